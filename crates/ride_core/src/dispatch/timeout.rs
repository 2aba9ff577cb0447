//! Batch timeout reaper. "All candidates responded" is observed by poll,
//! not guaranteed by a push event, so every batch schedules a wall-clock
//! timeout at creation; if the batch is still active when it fires, pending
//! candidates are timed out and dispatch advances to the next tier.

use bevy_ecs::prelude::{Entity, World};

use crate::clock::{CurrentEvent, EventKind, EventSubject, PlatformClock};
use crate::ecs::{BatchStatus, CandidateResponse, DispatchBatch, DispatchCandidate, Trip, TripStatus};

use super::engine::advance_dispatch;

pub fn batch_timeout_system(world: &mut World) {
    let Some(event) = world.get_resource::<CurrentEvent>().map(|e| e.0) else {
        return;
    };
    if event.kind != EventKind::BatchTimeout {
        return;
    }
    let Some(EventSubject::Batch(batch_entity)) = event.subject else {
        return;
    };
    let Some(batch) = world.get::<DispatchBatch>(batch_entity).copied() else {
        return;
    };
    // Already resolved by an accept or explicit exhaustion.
    if batch.status != BatchStatus::Active && batch.status != BatchStatus::Pending {
        return;
    }

    let now = world.resource::<PlatformClock>().now();
    let pending: Vec<Entity> = {
        let mut candidates = world.query::<(Entity, &DispatchCandidate)>();
        candidates
            .iter(world)
            .filter(|(_, c)| c.batch == batch_entity && c.response.is_none())
            .map(|(entity, _)| entity)
            .collect()
    };
    for entity in pending {
        if let Some(mut candidate) = world.get_mut::<DispatchCandidate>(entity) {
            candidate.response = Some(CandidateResponse::TimedOut);
            candidate.responded_at = Some(now);
        }
    }
    if let Some(mut stored) = world.get_mut::<DispatchBatch>(batch_entity) {
        stored.status = BatchStatus::NoAcceptance;
    }
    tracing::info!(trip = ?batch.trip, batch = ?batch_entity, "dispatch batch timed out");

    let still_dispatching = world
        .get::<Trip>(batch.trip)
        .map_or(false, |trip| trip.status == TripStatus::Dispatching);
    if still_dispatching {
        if let Err(err) = advance_dispatch(world, batch.trip, batch.tier_index + 1) {
            tracing::warn!(trip = ?batch.trip, %err, "failed to advance dispatch after timeout");
        }
    }
}
