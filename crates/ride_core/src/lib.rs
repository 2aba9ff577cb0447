//! Multi-tenant ride-hailing core: geo-dispatch over an H3 driver index,
//! the trip state machine, fare pricing, financial settlement, and payouts,
//! all running against a single ECS world driven by a discrete platform
//! clock.

pub mod clock;
pub mod dispatch;
pub mod ecs;
pub mod geo;
pub mod money;
pub mod otp;
pub mod payout;
pub mod pricing;
pub mod runner;
pub mod settlement;
pub mod telemetry;
pub mod trip;
