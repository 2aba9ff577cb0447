//! Operational counters, incremented at engine boundaries.

use bevy_ecs::prelude::Resource;

#[derive(Debug, Default, Resource)]
pub struct PlatformTelemetry {
    pub trips_requested: u64,
    pub dispatch_batches_created: u64,
    pub drivers_notified: u64,
    pub trips_assigned: u64,
    pub no_drivers_available: u64,
    pub trips_cancelled: u64,
    pub trips_completed: u64,
    pub payments_settled: u64,
    pub payout_items_paid: u64,
    pub payout_items_failed: u64,
}
