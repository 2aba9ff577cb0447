//! Dispatch batch creation, advancement, and driver-response handling.
//!
//! Every operation validates against the current world state before its
//! first mutation, and holds exclusive world access throughout, so the
//! multi-effect transitions here (notably the accept path) are atomic: two
//! racing accepts serialize and the loser observes a conflict.

use std::collections::HashSet;

use bevy_ecs::prelude::{Entity, World};
use thiserror::Error;

use crate::clock::{EventKind, EventSubject, PlatformClock};
use crate::ecs::{
    Actor, BatchStatus, CandidateResponse, DispatchBatch, DispatchCandidate, Driver,
    DriverRuntimeStatus, RequestStatus, StatusHistory, Trip, TripRequest, TripStatus, TripTiming,
    Vehicle,
};
use crate::geo::{DriverGeoIndex, DriverNotification, FleetKey, NotificationOutbox};
use crate::otp::{self, OtpConfig};
use crate::telemetry::PlatformTelemetry;

use super::tiers::DispatchConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("trip {0:?} not found")]
    TripNotFound(Entity),
    #[error("trip request {0:?} not found")]
    RequestNotFound(Entity),
    #[error("trip {trip:?} is no longer dispatching (status {status:?})")]
    NotDispatching { trip: Entity, status: TripStatus },
    #[error("batch {batch:?} is no longer active")]
    StaleBatch { batch: Entity },
    #[error("driver {driver:?} is not a candidate on trip {trip:?}")]
    UnknownCandidate { driver: Entity, trip: Entity },
    #[error("driver {driver:?} already responded with {response:?}")]
    DuplicateResponse {
        driver: Entity,
        response: CandidateResponse,
    },
    #[error("driver {0:?} is not available for a trip")]
    DriverUnavailable(Entity),
    #[error("driver {0:?} has no active vehicle")]
    MissingVehicle(Entity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    BatchCreated(Entity),
    /// Normal terminal outcome, not an error: every tier was tried.
    NoDriversAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverReply {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The five-effect accept transaction committed.
    Assigned,
    /// Rejection pushed the offer to the next-nearest pending candidate.
    NextCandidateNotified(Entity),
    /// Another notified candidate is still deciding; nothing to push.
    AwaitingCandidate,
    /// The batch was exhausted; a new batch opened at a wider tier.
    BatchAdvanced(Entity),
    NoDriversAvailable,
}

/// `StartDispatch(tripRequest)`: open the first batch for a request's trip.
pub fn start_dispatch(
    world: &mut World,
    request_entity: Entity,
) -> Result<DispatchOutcome, DispatchError> {
    let trip_entity = world
        .get::<TripRequest>(request_entity)
        .ok_or(DispatchError::RequestNotFound(request_entity))?
        .trip;
    advance_dispatch(world, trip_entity, 0)
}

/// Open the next batch for `trip_entity`, starting the tier scan at
/// `start_tier`. Tiers yielding no eligible drivers are skipped; running out
/// of tiers finalizes the trip as `no_drivers_available`.
pub fn advance_dispatch(
    world: &mut World,
    trip_entity: Entity,
    start_tier: usize,
) -> Result<DispatchOutcome, DispatchError> {
    let (tenant, city, category, pickup) = {
        let trip = world
            .get::<Trip>(trip_entity)
            .ok_or(DispatchError::TripNotFound(trip_entity))?;
        (trip.tenant, trip.city, trip.category, trip.pickup)
    };
    let key = FleetKey {
        tenant,
        city,
        category,
    };

    // Drivers already offered this trip are never offered it again.
    let excluded: HashSet<Entity> = {
        let mut candidates = world.query::<&DispatchCandidate>();
        candidates
            .iter(world)
            .filter(|candidate| candidate.trip == trip_entity)
            .map(|candidate| candidate.driver)
            .collect()
    };
    let batch_count = {
        let mut batches = world.query::<&DispatchBatch>();
        batches
            .iter(world)
            .filter(|batch| batch.trip == trip_entity)
            .count() as u32
    };

    let tiers = world.resource::<DispatchConfig>().tiers.clone();
    let now = world.resource::<PlatformClock>().now();

    for (tier_index, tier) in tiers.iter().enumerate().skip(start_tier) {
        let nearby = world.resource::<DriverGeoIndex>().query_nearest(
            key,
            pickup,
            tier.radius_km,
            tier.max_drivers,
            &excluded,
            now,
        );
        let eligible: Vec<(Entity, f64)> = nearby
            .into_iter()
            .filter(|(driver, _)| {
                matches!(
                    world.get::<Driver>(*driver),
                    Some(d) if d.status == DriverRuntimeStatus::Available
                )
            })
            .collect();
        if eligible.is_empty() {
            continue;
        }

        let batch_entity = world
            .spawn(DispatchBatch {
                trip: trip_entity,
                batch_number: batch_count + 1,
                tier_index,
                radius_km: tier.radius_km,
                max_drivers: tier.max_drivers,
                timeout_secs: tier.timeout_secs,
                status: BatchStatus::Pending,
                created_at: now,
            })
            .id();

        let mut head_candidate = None;
        for (driver, distance_km) in &eligible {
            let candidate = world
                .spawn(DispatchCandidate {
                    batch: batch_entity,
                    trip: trip_entity,
                    driver: *driver,
                    distance_km: *distance_km,
                    response: None,
                    sent_at: None,
                    responded_at: None,
                })
                .id();
            if head_candidate.is_none() {
                head_candidate = Some(candidate);
            }
        }

        mark_trip_dispatching(world, trip_entity, now);
        if let Some(candidate) = head_candidate {
            notify_candidate(world, candidate, now);
        }
        world.resource_mut::<PlatformClock>().schedule_in_secs(
            tier.timeout_secs,
            EventKind::BatchTimeout,
            Some(EventSubject::Batch(batch_entity)),
        );
        world
            .resource_mut::<PlatformTelemetry>()
            .dispatch_batches_created += 1;

        tracing::info!(
            trip = ?trip_entity,
            batch = ?batch_entity,
            tier = tier_index,
            radius_km = tier.radius_km,
            candidates = eligible.len(),
            "dispatch batch opened"
        );
        return Ok(DispatchOutcome::BatchCreated(batch_entity));
    }

    finalize_no_drivers(world, trip_entity, now);
    Ok(DispatchOutcome::NoDriversAvailable)
}

/// `RecordDriverResponse`: fold one driver's accept/reject into the trip.
pub fn record_driver_response(
    world: &mut World,
    trip_entity: Entity,
    driver: Entity,
    reply: DriverReply,
) -> Result<ResponseOutcome, DispatchError> {
    let trip_status = world
        .get::<Trip>(trip_entity)
        .ok_or(DispatchError::TripNotFound(trip_entity))?
        .status;
    if trip_status != TripStatus::Dispatching {
        return Err(DispatchError::NotDispatching {
            trip: trip_entity,
            status: trip_status,
        });
    }

    let (candidate_entity, candidate) = {
        let mut candidates = world.query::<(Entity, &DispatchCandidate)>();
        candidates
            .iter(world)
            .find(|(_, c)| c.trip == trip_entity && c.driver == driver)
            .map(|(entity, c)| (entity, *c))
            .ok_or(DispatchError::UnknownCandidate {
                driver,
                trip: trip_entity,
            })?
    };

    let batch = world
        .get::<DispatchBatch>(candidate.batch)
        .copied()
        .ok_or(DispatchError::StaleBatch {
            batch: candidate.batch,
        })?;
    if batch.status != BatchStatus::Active {
        return Err(DispatchError::StaleBatch {
            batch: candidate.batch,
        });
    }
    if let Some(response) = candidate.response {
        return Err(DispatchError::DuplicateResponse { driver, response });
    }

    match reply {
        DriverReply::Reject => handle_rejection(
            world,
            trip_entity,
            candidate_entity,
            candidate.batch,
            batch.tier_index,
        ),
        DriverReply::Accept => handle_acceptance(world, trip_entity, candidate_entity, driver),
    }
}

fn handle_rejection(
    world: &mut World,
    trip_entity: Entity,
    candidate_entity: Entity,
    batch_entity: Entity,
    tier_index: usize,
) -> Result<ResponseOutcome, DispatchError> {
    let now = world.resource::<PlatformClock>().now();
    if let Some(mut candidate) = world.get_mut::<DispatchCandidate>(candidate_entity) {
        candidate.response = Some(CandidateResponse::Rejected);
        candidate.responded_at = Some(now);
    }

    // Closest-first sequential notification: push the next unsent pending
    // candidate of this batch, if any.
    let (next, any_pending) = {
        let mut candidates = world.query::<(Entity, &DispatchCandidate)>();
        let mut next: Option<(Entity, Entity, f64)> = None;
        let mut any_pending = false;
        for (entity, c) in candidates.iter(world) {
            if c.batch != batch_entity || c.response.is_some() {
                continue;
            }
            any_pending = true;
            if c.sent_at.is_none() && next.map_or(true, |(_, _, best)| c.distance_km < best) {
                next = Some((entity, c.driver, c.distance_km));
            }
        }
        (next, any_pending)
    };

    if let Some((next_candidate, next_driver, _)) = next {
        notify_candidate(world, next_candidate, now);
        return Ok(ResponseOutcome::NextCandidateNotified(next_driver));
    }
    if any_pending {
        return Ok(ResponseOutcome::AwaitingCandidate);
    }

    // All candidates responded and none accepted: the batch is exhausted.
    if let Some(mut stored) = world.get_mut::<DispatchBatch>(batch_entity) {
        stored.status = BatchStatus::NoAcceptance;
    }
    tracing::debug!(trip = ?trip_entity, batch = ?batch_entity, "batch exhausted, advancing");
    match advance_dispatch(world, trip_entity, tier_index + 1)? {
        DispatchOutcome::BatchCreated(next_batch) => Ok(ResponseOutcome::BatchAdvanced(next_batch)),
        DispatchOutcome::NoDriversAvailable => Ok(ResponseOutcome::NoDriversAvailable),
    }
}

fn handle_acceptance(
    world: &mut World,
    trip_entity: Entity,
    candidate_entity: Entity,
    driver: Entity,
) -> Result<ResponseOutcome, DispatchError> {
    // Validate everything up front; the mutations below must all happen or
    // none of them.
    let driver_status = world
        .get::<Driver>(driver)
        .ok_or(DispatchError::DriverUnavailable(driver))?
        .status;
    if driver_status != DriverRuntimeStatus::Available {
        return Err(DispatchError::DriverUnavailable(driver));
    }
    let vehicle = world
        .get::<Vehicle>(driver)
        .copied()
        .ok_or(DispatchError::MissingVehicle(driver))?;

    let now = world.resource::<PlatformClock>().now();
    let batch_entity = world
        .get::<DispatchCandidate>(candidate_entity)
        .map(|c| c.batch);
    let losers: Vec<Entity> = {
        let mut candidates = world.query::<(Entity, &DispatchCandidate)>();
        candidates
            .iter(world)
            .filter(|(entity, c)| {
                c.trip == trip_entity && c.response.is_none() && *entity != candidate_entity
            })
            .map(|(entity, _)| entity)
            .collect()
    };

    // (a) winning candidate
    if let Some(mut candidate) = world.get_mut::<DispatchCandidate>(candidate_entity) {
        candidate.response = Some(CandidateResponse::Accepted);
        candidate.responded_at = Some(now);
    }
    // (b) every other still-pending candidate on the trip times out
    for loser in losers {
        if let Some(mut candidate) = world.get_mut::<DispatchCandidate>(loser) {
            candidate.response = Some(CandidateResponse::TimedOut);
            candidate.responded_at = Some(now);
        }
    }
    if let Some(batch_entity) = batch_entity {
        if let Some(mut batch) = world.get_mut::<DispatchBatch>(batch_entity) {
            batch.status = BatchStatus::Completed;
        }
    }
    // (c) trip transitions to assigned with driver + vehicle bound
    let request_entity = {
        let Some(mut trip) = world.get_mut::<Trip>(trip_entity) else {
            return Err(DispatchError::TripNotFound(trip_entity));
        };
        trip.status = TripStatus::Assigned;
        trip.driver = Some(driver);
        trip.vehicle = Some(vehicle.id);
        trip.request
    };
    if let Some(mut timing) = world.get_mut::<TripTiming>(trip_entity) {
        timing.assigned_at = Some(now);
    }
    if let Some(mut history) = world.get_mut::<StatusHistory>(trip_entity) {
        history.record(
            Some(TripStatus::Dispatching),
            TripStatus::Assigned,
            Actor::Driver,
            now,
        );
    }
    if let Some(mut request) = world.get_mut::<TripRequest>(request_entity) {
        request.status = RequestStatus::DriverAssigned;
    }
    // (d) driver runtime status locks to on-trip
    if let Some(mut driver_row) = world.get_mut::<Driver>(driver) {
        driver_row.status = DriverRuntimeStatus::OnTrip;
        driver_row.active_trip = Some(trip_entity);
    }
    // (e) pickup OTP issued
    let otp_config = *world.resource::<OtpConfig>();
    let code = otp::generate(trip_entity, &otp_config, now);
    world.entity_mut(trip_entity).insert(code);

    world.resource_mut::<PlatformTelemetry>().trips_assigned += 1;
    tracing::info!(trip = ?trip_entity, ?driver, "trip assigned");
    Ok(ResponseOutcome::Assigned)
}

fn mark_trip_dispatching(world: &mut World, trip_entity: Entity, now: u64) {
    let (prev, request_entity) = {
        let Some(mut trip) = world.get_mut::<Trip>(trip_entity) else {
            return;
        };
        let prev = trip.status;
        if prev == TripStatus::Dispatching {
            return;
        }
        trip.status = TripStatus::Dispatching;
        (prev, trip.request)
    };
    if let Some(mut history) = world.get_mut::<StatusHistory>(trip_entity) {
        history.record(Some(prev), TripStatus::Dispatching, Actor::Dispatch, now);
    }
    if let Some(mut request) = world.get_mut::<TripRequest>(request_entity) {
        request.status = RequestStatus::Dispatching;
    }
}

fn notify_candidate(world: &mut World, candidate_entity: Entity, now: u64) {
    let Some((driver, trip, batch)) = world
        .get::<DispatchCandidate>(candidate_entity)
        .map(|c| (c.driver, c.trip, c.batch))
    else {
        return;
    };
    if let Some(mut candidate) = world.get_mut::<DispatchCandidate>(candidate_entity) {
        candidate.sent_at = Some(now);
    }
    if let Some(mut stored) = world.get_mut::<DispatchBatch>(batch) {
        if stored.status == BatchStatus::Pending {
            stored.status = BatchStatus::Active;
        }
    }
    world
        .resource_mut::<NotificationOutbox>()
        .publish(DriverNotification {
            channel: format!("driver:{}", driver.index()),
            driver,
            trip,
            batch,
            sent_at: now,
        });
    world.resource_mut::<PlatformTelemetry>().drivers_notified += 1;
}

fn finalize_no_drivers(world: &mut World, trip_entity: Entity, now: u64) {
    let (prev, request_entity) = {
        let Some(mut trip) = world.get_mut::<Trip>(trip_entity) else {
            return;
        };
        let prev = trip.status;
        trip.status = TripStatus::Cancelled;
        (prev, trip.request)
    };
    if let Some(mut timing) = world.get_mut::<TripTiming>(trip_entity) {
        timing.cancelled_at = Some(now);
    }
    if let Some(mut history) = world.get_mut::<StatusHistory>(trip_entity) {
        history.record(Some(prev), TripStatus::Cancelled, Actor::Dispatch, now);
    }
    if let Some(mut request) = world.get_mut::<TripRequest>(request_entity) {
        request.status = RequestStatus::NoDriversAvailable;
    }
    world.resource_mut::<PlatformTelemetry>().no_drivers_available += 1;
    tracing::info!(trip = ?trip_entity, "no drivers available after all tiers");
}
