use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::{Entity, Resource};

pub const ONE_SEC_MS: u64 = 1_000;

/// Timed events the platform schedules against wall-clock time. External
/// actions (ride requests, driver responses, payment confirmations) are
/// synchronous engine calls; only timeout-driven paths go through the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    BatchTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventSubject {
    Trip(Entity),
    Batch(Entity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub kind: EventKind,
    pub subject: Option<EventSubject>,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by timestamp.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.subject.cmp(&other.subject))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The event currently being processed by the schedule.
#[derive(Debug, Clone, Copy, Resource)]
pub struct CurrentEvent(pub Event);

/// Monotonic platform clock plus the pending timeout queue.
///
/// `now` only advances when an event is popped, so engine operations that
/// run between events all observe the same timestamp.
#[derive(Debug, Default, Resource)]
pub struct PlatformClock {
    now: u64,
    events: BinaryHeap<Event>,
}

impl PlatformClock {
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Advance the clock without processing events. Used by callers that
    /// model externally elapsed time (e.g. OTP expiry in tests).
    pub fn advance_to(&mut self, timestamp: u64) {
        debug_assert!(timestamp >= self.now, "clock must not run backwards");
        self.now = timestamp;
    }

    pub fn schedule(&mut self, event: Event) {
        debug_assert!(
            event.timestamp >= self.now,
            "event timestamp must be >= current time"
        );
        self.events.push(event);
    }

    pub fn schedule_at(&mut self, timestamp: u64, kind: EventKind, subject: Option<EventSubject>) {
        self.schedule(Event {
            timestamp,
            kind,
            subject,
        });
    }

    pub fn schedule_in_secs(&mut self, secs: u64, kind: EventKind, subject: Option<EventSubject>) {
        self.schedule_at(self.now + secs * ONE_SEC_MS, kind, subject);
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.events.peek().map(|event| event.timestamp)
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        self.now = event.timestamp;
        Some(event)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
