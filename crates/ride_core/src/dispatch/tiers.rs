use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

/// One search tier: how far to look, how many drivers to offer, and how long
/// the batch may stay open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DispatchTier {
    pub radius_km: f64,
    pub max_drivers: usize,
    pub timeout_secs: u64,
}

/// Ordered tier list, tried in increasing radius order.
#[derive(Debug, Clone, Resource, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub tiers: Vec<DispatchTier>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                DispatchTier {
                    radius_km: 3.0,
                    max_drivers: 5,
                    timeout_secs: 15,
                },
                DispatchTier {
                    radius_km: 6.0,
                    max_drivers: 8,
                    timeout_secs: 20,
                },
                DispatchTier {
                    radius_km: 10.0,
                    max_drivers: 12,
                    timeout_secs: 25,
                },
            ],
        }
    }
}
