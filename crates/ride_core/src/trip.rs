//! Trip state machine. Every transition happens inside one of these
//! operations: validation first, then all writes, so a failed call leaves
//! the trip untouched. `Trip.status` and the [StatusHistory] row are always
//! written together.

use bevy_ecs::prelude::{Entity, World};
use bevy_ecs::world::Mut;
use h3o::CellIndex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::clock::PlatformClock;
use crate::dispatch::{self, DispatchError, DispatchOutcome};
use crate::ecs::{
    Actor, BatchStatus, CandidateResponse, CityId, DispatchBatch, DispatchCandidate, Driver,
    DriverRuntimeStatus, RequestStatus, StatusHistory, TenantId, Trip, TripRequest, TripStatus,
    TripTiming, VehicleCategory,
};
use crate::geo;
use crate::money::{round_minor, ONE_HUNDRED};
use crate::otp::{OtpError, PickupOtp};
use crate::pricing::engine::FareInputs;
use crate::pricing::{
    self, CouponBook, EstimatedFare, Fare, FareBreakdown, PricingError, RateCard, SurgeZones,
};
use crate::settlement::{Payment, PaymentStatus};
use crate::telemetry::PlatformTelemetry;

/// Assumed average speed for the duration estimate at request time.
const NOMINAL_SPEED_KMH: Decimal = dec!(25);
/// Fee after a driver is assigned but before pickup, as a percent of the
/// estimated fare. After pickup the full estimate is charged.
const ASSIGNED_CANCEL_PERCENT: Decimal = dec!(50);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TripError {
    #[error("trip {0:?} not found")]
    NotFound(Entity),
    #[error("cannot move trip from {from:?} to {to:?}")]
    InvalidTransition { from: TripStatus, to: TripStatus },
    #[error("trip is already cancelled")]
    AlreadyCancelled,
    #[error("trip {0:?} already has a finalized fare")]
    FareAlreadyExists(Entity),
    #[error("trip {0:?} has no assigned driver")]
    MissingDriver(Entity),
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone)]
pub struct RideAsk {
    pub rider: Entity,
    pub tenant: TenantId,
    pub city: CityId,
    pub category: VehicleCategory,
    pub pickup: CellIndex,
    pub dropoff: CellIndex,
    pub pickup_address: String,
    pub dropoff_address: String,
}

#[derive(Debug)]
pub struct RequestedTrip {
    pub request: Entity,
    pub trip: Entity,
    pub estimate: FareBreakdown,
    pub dispatch: DispatchOutcome,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CancellationOutcome {
    Cancelled { fee: Decimal },
    /// Driver backed out after accepting; the trip went back to searching.
    DispatchResumed(DispatchOutcome),
}

fn estimated_distance_km(pickup: CellIndex, dropoff: CellIndex) -> Decimal {
    let km = geo::distance_km_between_cells(pickup, dropoff);
    Decimal::from_f64_retain(km).unwrap_or(Decimal::ZERO).round_dp(2)
}

fn estimated_duration_min(distance_km: Decimal) -> Decimal {
    (distance_km * dec!(60) / NOMINAL_SPEED_KMH).round_dp(1)
}

/// Creates the request/trip pair, quotes a fare, and kicks off dispatch.
pub fn request_trip(world: &mut World, ask: RideAsk) -> Result<RequestedTrip, TripError> {
    let now = world.resource::<PlatformClock>().now();
    let distance_km = estimated_distance_km(ask.pickup, ask.dropoff);
    let duration_min = estimated_duration_min(distance_km);

    let inputs = FareInputs {
        tenant: ask.tenant,
        city: ask.city,
        category: ask.category,
        pickup: ask.pickup,
        distance_km,
        duration_min,
    };
    let estimate = {
        let rates = world.resource::<RateCard>();
        let surges = world.resource::<SurgeZones>();
        pricing::quote(rates, surges, &inputs, now)?
    };

    let request_entity = world.spawn_empty().id();
    let mut history = StatusHistory::default();
    history.record(None, TripStatus::Requested, Actor::Rider, now);
    let trip_entity = world
        .spawn((
            Trip {
                request: request_entity,
                tenant: ask.tenant,
                city: ask.city,
                category: ask.category,
                rider: ask.rider,
                driver: None,
                vehicle: None,
                pickup: ask.pickup,
                dropoff: ask.dropoff,
                pickup_address: ask.pickup_address.clone(),
                dropoff_address: ask.dropoff_address.clone(),
                status: TripStatus::Requested,
                currency: estimate.currency,
                estimated_distance_km: distance_km,
                estimated_duration_min: duration_min,
                actual_distance_km: None,
                actual_duration_min: None,
                cancellation_fee: None,
            },
            TripTiming {
                requested_at: now,
                ..Default::default()
            },
            history,
            EstimatedFare(estimate.clone()),
        ))
        .id();
    world.entity_mut(request_entity).insert(TripRequest {
        rider: ask.rider,
        tenant: ask.tenant,
        city: ask.city,
        category: ask.category,
        pickup: ask.pickup,
        dropoff: ask.dropoff,
        pickup_address: ask.pickup_address,
        dropoff_address: ask.dropoff_address,
        status: RequestStatus::Searching,
        trip: trip_entity,
        requested_at: now,
    });
    world.resource_mut::<PlatformTelemetry>().trips_requested += 1;
    tracing::info!(
        trip = ?trip_entity,
        rider = ?ask.rider,
        estimate = %estimate.final_fare,
        "trip requested"
    );

    let dispatch = dispatch::start_dispatch(world, request_entity)?;
    Ok(RequestedTrip {
        request: request_entity,
        trip: trip_entity,
        estimate,
        dispatch,
    })
}

/// `assigned → picked_up`, gated on the pickup code. The code is removed on
/// success so it cannot be replayed.
pub fn start_trip(world: &mut World, trip_entity: Entity, code: &str) -> Result<(), TripError> {
    let now = world.resource::<PlatformClock>().now();
    let status = world
        .get::<Trip>(trip_entity)
        .ok_or(TripError::NotFound(trip_entity))?
        .status;
    if status != TripStatus::Assigned {
        return Err(TripError::InvalidTransition {
            from: status,
            to: TripStatus::PickedUp,
        });
    }
    {
        let Some(mut otp) = world.get_mut::<PickupOtp>(trip_entity) else {
            return Err(OtpError::Missing.into());
        };
        otp.verify(code, now)?;
    }
    world.entity_mut(trip_entity).remove::<PickupOtp>();

    if let Some(mut trip) = world.get_mut::<Trip>(trip_entity) {
        trip.status = TripStatus::PickedUp;
    }
    if let Some(mut timing) = world.get_mut::<TripTiming>(trip_entity) {
        timing.picked_up_at = Some(now);
    }
    if let Some(mut history) = world.get_mut::<StatusHistory>(trip_entity) {
        history.record(
            Some(TripStatus::Assigned),
            TripStatus::PickedUp,
            Actor::Driver,
            now,
        );
    }
    tracing::info!(trip = ?trip_entity, "rider picked up");
    Ok(())
}

/// `picked_up → payment_pending`: finalizes the fare from actuals and opens
/// the payment row. The fare is written exactly once per trip.
pub fn complete_trip(
    world: &mut World,
    trip_entity: Entity,
    actual_distance_km: Decimal,
    actual_duration_min: Decimal,
) -> Result<FareBreakdown, TripError> {
    let now = world.resource::<PlatformClock>().now();
    let trip = world
        .get::<Trip>(trip_entity)
        .ok_or(TripError::NotFound(trip_entity))?;
    if trip.status != TripStatus::PickedUp {
        return Err(TripError::InvalidTransition {
            from: trip.status,
            to: TripStatus::PaymentPending,
        });
    }
    if world.get::<Fare>(trip_entity).is_some() {
        return Err(TripError::FareAlreadyExists(trip_entity));
    }
    let inputs = FareInputs {
        tenant: trip.tenant,
        city: trip.city,
        category: trip.category,
        pickup: trip.pickup,
        distance_km: actual_distance_km,
        duration_min: actual_duration_min,
    };
    let rider = trip.rider;
    let driver = trip.driver;

    let fare = world.resource_scope(|world, mut coupons: Mut<CouponBook>| {
        let rates = world.resource::<RateCard>();
        let surges = world.resource::<SurgeZones>();
        pricing::finalize_fare(rates, surges, &mut coupons, &inputs, rider, trip_entity, now)
    })?;

    world.entity_mut(trip_entity).insert((
        Fare(fare.clone()),
        Payment {
            trip: trip_entity,
            amount: fare.final_fare,
            currency: fare.currency,
            status: PaymentStatus::Initiated,
            method: None,
            receipt: None,
        },
    ));
    if let Some(mut trip) = world.get_mut::<Trip>(trip_entity) {
        trip.actual_distance_km = Some(actual_distance_km);
        trip.actual_duration_min = Some(actual_duration_min);
        trip.status = TripStatus::PaymentPending;
    }
    if let Some(mut timing) = world.get_mut::<TripTiming>(trip_entity) {
        timing.payment_pending_at = Some(now);
    }
    if let Some(mut history) = world.get_mut::<StatusHistory>(trip_entity) {
        history.record(
            Some(TripStatus::PickedUp),
            TripStatus::PaymentPending,
            Actor::Driver,
            now,
        );
    }
    // The physical ride is over; the driver takes new work while payment
    // settles.
    if let Some(driver) = driver {
        release_driver(world, driver, trip_entity);
    }
    world.resource_mut::<PlatformTelemetry>().trips_completed += 1;
    tracing::info!(trip = ?trip_entity, fare = %fare.final_fare, "trip completed, payment pending");
    Ok(fare)
}

/// Cancels a trip, or, for a driver backing out after accepting, unbinds the
/// driver and resumes the search.
///
/// Fee schedule (rider/system cancels): free before assignment, half the
/// estimate once assigned, the full estimate after pickup. The fee is
/// recorded on the trip; collecting it is a settlement concern.
pub fn cancel_trip(
    world: &mut World,
    trip_entity: Entity,
    actor: Actor,
) -> Result<CancellationOutcome, TripError> {
    let now = world.resource::<PlatformClock>().now();
    let trip = world
        .get::<Trip>(trip_entity)
        .ok_or(TripError::NotFound(trip_entity))?;
    let status = trip.status;
    match status {
        TripStatus::Completed => {
            return Err(TripError::InvalidTransition {
                from: status,
                to: TripStatus::Cancelled,
            })
        }
        TripStatus::Cancelled => return Err(TripError::AlreadyCancelled),
        _ => {}
    }
    let request_entity = trip.request;
    let driver = trip.driver;

    if actor == Actor::Driver {
        return driver_backs_out(world, trip_entity, request_entity, status, driver, now);
    }

    let estimate = world
        .get::<EstimatedFare>(trip_entity)
        .map(|e| e.0.final_fare)
        .unwrap_or(Decimal::ZERO);
    let fee = match status {
        TripStatus::Requested | TripStatus::Dispatching => Decimal::ZERO,
        TripStatus::Assigned => round_minor(estimate * ASSIGNED_CANCEL_PERCENT / ONE_HUNDRED),
        _ => estimate,
    };

    // Close any open batch and time out its pending offers so a late driver
    // accept hits a resolved batch instead of a cancelled trip.
    let open_batches: Vec<Entity> = {
        let mut batches = world.query::<(Entity, &DispatchBatch)>();
        batches
            .iter(world)
            .filter(|(_, b)| {
                b.trip == trip_entity
                    && matches!(b.status, BatchStatus::Pending | BatchStatus::Active)
            })
            .map(|(entity, _)| entity)
            .collect()
    };
    for batch in open_batches {
        if let Some(mut stored) = world.get_mut::<DispatchBatch>(batch) {
            stored.status = BatchStatus::Completed;
        }
    }
    let pending_candidates: Vec<Entity> = {
        let mut candidates = world.query::<(Entity, &DispatchCandidate)>();
        candidates
            .iter(world)
            .filter(|(_, c)| c.trip == trip_entity && c.response.is_none())
            .map(|(entity, _)| entity)
            .collect()
    };
    for candidate in pending_candidates {
        if let Some(mut stored) = world.get_mut::<DispatchCandidate>(candidate) {
            stored.response = Some(CandidateResponse::TimedOut);
            stored.responded_at = Some(now);
        }
    }

    world.entity_mut(trip_entity).remove::<PickupOtp>();
    if let Some(driver) = driver {
        release_driver(world, driver, trip_entity);
    }
    if let Some(mut payment) = world.get_mut::<Payment>(trip_entity) {
        if payment.status == PaymentStatus::Initiated {
            payment.status = PaymentStatus::Failed;
        }
    }
    if let Some(mut trip) = world.get_mut::<Trip>(trip_entity) {
        trip.status = TripStatus::Cancelled;
        trip.cancellation_fee = Some(fee);
    }
    if let Some(mut timing) = world.get_mut::<TripTiming>(trip_entity) {
        timing.cancelled_at = Some(now);
    }
    if let Some(mut history) = world.get_mut::<StatusHistory>(trip_entity) {
        history.record(Some(status), TripStatus::Cancelled, actor, now);
    }
    if let Some(mut request) = world.get_mut::<TripRequest>(request_entity) {
        request.status = RequestStatus::Cancelled;
    }
    world.resource_mut::<PlatformTelemetry>().trips_cancelled += 1;
    tracing::info!(trip = ?trip_entity, ?actor, fee = %fee, "trip cancelled");
    Ok(CancellationOutcome::Cancelled { fee })
}

/// A driver may only back out between accept and pickup. The trip goes back
/// to `dispatching` and the search resumes at the tier that produced the
/// assignment; the backing-out driver is already a responded candidate, so
/// they are not offered the trip again.
fn driver_backs_out(
    world: &mut World,
    trip_entity: Entity,
    request_entity: Entity,
    status: TripStatus,
    driver: Option<Entity>,
    now: u64,
) -> Result<CancellationOutcome, TripError> {
    if status != TripStatus::Assigned {
        return Err(TripError::InvalidTransition {
            from: status,
            to: TripStatus::Dispatching,
        });
    }
    let driver = driver.ok_or(TripError::MissingDriver(trip_entity))?;
    let resume_tier = {
        let mut batches = world.query::<&DispatchBatch>();
        batches
            .iter(world)
            .filter(|b| b.trip == trip_entity)
            .map(|b| b.tier_index)
            .max()
            .unwrap_or(0)
    };

    world.entity_mut(trip_entity).remove::<PickupOtp>();
    if let Some(mut trip) = world.get_mut::<Trip>(trip_entity) {
        trip.driver = None;
        trip.vehicle = None;
        trip.status = TripStatus::Dispatching;
    }
    if let Some(mut history) = world.get_mut::<StatusHistory>(trip_entity) {
        history.record(
            Some(TripStatus::Assigned),
            TripStatus::Dispatching,
            Actor::Driver,
            now,
        );
    }
    if let Some(mut request) = world.get_mut::<TripRequest>(request_entity) {
        request.status = RequestStatus::Dispatching;
    }
    release_driver(world, driver, trip_entity);
    tracing::info!(trip = ?trip_entity, ?driver, "driver backed out, resuming dispatch");

    let outcome = dispatch::advance_dispatch(world, trip_entity, resume_tier)?;
    Ok(CancellationOutcome::DispatchResumed(outcome))
}

fn release_driver(world: &mut World, driver: Entity, trip: Entity) {
    if let Some(mut stored) = world.get_mut::<Driver>(driver) {
        if stored.active_trip == Some(trip) {
            stored.status = DriverRuntimeStatus::Available;
            stored.active_trip = None;
        }
    }
}
