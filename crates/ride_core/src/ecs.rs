//! Core entities and components: drivers, vehicles, trip requests, trips,
//! dispatch batches and candidates.
//!
//! `Trip.status` is a materialized projection; the authoritative record of
//! every transition is the append-only [StatusHistory] on the same entity.
//! Both are written in the same engine operation and never independently.

use bevy_ecs::prelude::{Component, Entity};
use h3o::CellIndex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CityId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FleetOwnerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VehicleCategory {
    Bike,
    Auto,
    Sedan,
    Suv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    Inr,
    Usd,
    Eur,
}

/// Who owns a vehicle: an owner-driver or a fleet. The earnings side of a
/// settlement goes to this party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    Driver(Entity),
    Fleet(FleetOwnerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverRuntimeStatus {
    Available,
    OnTrip,
    Offline,
}

/// A driver eligible for dispatch in one tenant/city. Eligibility (KYC,
/// vehicle approval) is decided upstream; only eligible drivers are spawned
/// here and registered in the geo index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct Driver {
    pub tenant: TenantId,
    pub city: CityId,
    pub status: DriverRuntimeStatus,
    pub active_trip: Option<Entity>,
}

/// The driver's active vehicle, carried on the driver entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct Vehicle {
    pub id: VehicleId,
    pub category: VehicleCategory,
    pub owner: Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Component)]
pub struct Rider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Searching,
    Dispatching,
    DriverAssigned,
    NoDriversAvailable,
    Cancelled,
}

/// The rider's ask. One request yields at most one accepted trip.
#[derive(Debug, Clone, Component)]
pub struct TripRequest {
    pub rider: Entity,
    pub tenant: TenantId,
    pub city: CityId,
    pub category: VehicleCategory,
    pub pickup: CellIndex,
    pub dropoff: CellIndex,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub status: RequestStatus,
    pub trip: Entity,
    pub requested_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripStatus {
    Requested,
    Dispatching,
    Assigned,
    PickedUp,
    PaymentPending,
    Completed,
    Cancelled,
}

/// The committed ride. Owned by the trip state machine; dispatch and
/// settlement read it but transition it only through `trip::` operations.
#[derive(Debug, Clone, Component)]
pub struct Trip {
    pub request: Entity,
    pub tenant: TenantId,
    pub city: CityId,
    pub category: VehicleCategory,
    pub rider: Entity,
    pub driver: Option<Entity>,
    pub vehicle: Option<VehicleId>,
    pub pickup: CellIndex,
    pub dropoff: CellIndex,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub status: TripStatus,
    pub currency: Currency,
    pub estimated_distance_km: Decimal,
    pub estimated_duration_min: Decimal,
    pub actual_distance_km: Option<Decimal>,
    pub actual_duration_min: Option<Decimal>,
    pub cancellation_fee: Option<Decimal>,
}

/// Per-transition timestamps (platform clock ms).
#[derive(Debug, Clone, Copy, Default, Component)]
pub struct TripTiming {
    pub requested_at: u64,
    pub assigned_at: Option<u64>,
    pub picked_up_at: Option<u64>,
    pub payment_pending_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub cancelled_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Rider,
    Driver,
    Dispatch,
    Settlement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: Option<TripStatus>,
    pub to: TripStatus,
    pub actor: Actor,
    pub at: u64,
}

/// Append-only transition log; authoritative for audits. Entries are only
/// ever pushed, in the same operation that updates `Trip.status`.
#[derive(Debug, Clone, Default, Component)]
pub struct StatusHistory(Vec<StatusChange>);

impl StatusHistory {
    pub fn record(&mut self, from: Option<TripStatus>, to: TripStatus, actor: Actor, at: u64) {
        self.0.push(StatusChange {
            from,
            to,
            actor,
            at,
        });
    }

    pub fn entries(&self) -> &[StatusChange] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Active,
    Completed,
    NoAcceptance,
}

/// One wave of driver notifications at a fixed search radius. At most one
/// batch per trip is past `Pending` and unterminated at any time.
#[derive(Debug, Clone, Copy, Component)]
pub struct DispatchBatch {
    pub trip: Entity,
    pub batch_number: u32,
    pub tier_index: usize,
    pub radius_km: f64,
    pub max_drivers: usize,
    pub timeout_secs: u64,
    pub status: BatchStatus,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateResponse {
    Accepted,
    Rejected,
    TimedOut,
}

/// One driver offered one batch. `response: None` means still pending.
#[derive(Debug, Clone, Copy, Component)]
pub struct DispatchCandidate {
    pub batch: Entity,
    pub trip: Entity,
    pub driver: Entity,
    pub distance_km: f64,
    pub response: Option<CandidateResponse>,
    pub sent_at: Option<u64>,
    pub responded_at: Option<u64>,
}
