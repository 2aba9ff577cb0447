//! Drives the platform: pops clock events one at a time and runs the
//! schedule against each. External actions (requests, responses, payment
//! confirmations) are synchronous engine calls between events; only the
//! timeout machinery runs through here.

use bevy_ecs::prelude::{Res, Schedule, World};
use bevy_ecs::schedule::{apply_deferred, IntoSystemConfigs};

use crate::clock::{CurrentEvent, Event, EventKind, PlatformClock};
use crate::dispatch::batch_timeout_system;

pub fn is_batch_timeout(event: Option<Res<CurrentEvent>>) -> bool {
    event.map_or(false, |event| event.0.kind == EventKind::BatchTimeout)
}

pub fn platform_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems(
        (
            batch_timeout_system.run_if(is_batch_timeout),
            apply_deferred,
        )
            .chain(),
    );
    schedule
}

/// Pop the next event, advance the clock to it, and run the schedule.
/// Returns the processed event, or `None` when the queue is empty.
pub fn run_next_event(world: &mut World, schedule: &mut Schedule) -> Option<Event> {
    let event = world.resource_mut::<PlatformClock>().pop_next()?;
    world.insert_resource(CurrentEvent(event));
    schedule.run(world);
    world.remove_resource::<CurrentEvent>();
    Some(event)
}

/// Drain the event queue, including events scheduled while draining.
/// Returns how many events were processed.
pub fn run_until_empty(world: &mut World, schedule: &mut Schedule) -> usize {
    let mut processed = 0;
    while run_next_event(world, schedule).is_some() {
        processed += 1;
    }
    processed
}
