//! Geo-dispatch: turns a trip request into successive driver-notification
//! batches with expanding search radius, and folds driver responses back
//! into the trip.

pub mod engine;
pub mod tiers;
pub mod timeout;

pub use engine::{
    advance_dispatch, record_driver_response, start_dispatch, DispatchError, DispatchOutcome,
    DriverReply, ResponseOutcome,
};
pub use tiers::{DispatchConfig, DispatchTier};
pub use timeout::batch_timeout_system;
