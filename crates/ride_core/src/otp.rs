//! Pickup OTP: a short single-use code gating the `assigned → picked_up`
//! transition. Brute force is bounded by the attempt cap, not code length.

use bevy_ecs::prelude::{Component, Entity, Resource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OtpError {
    #[error("no pickup code issued for this trip")]
    Missing,
    #[error("pickup code expired")]
    Expired,
    #[error("pickup code invalidated after too many attempts")]
    Invalidated,
    #[error("wrong pickup code ({attempts_left} attempts left)")]
    Mismatch { attempts_left: u8 },
}

#[derive(Debug, Clone, Copy, Resource)]
pub struct OtpConfig {
    pub seed: u64,
    pub ttl_ms: u64,
    pub max_attempts: u8,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            seed: 0x07b5_c0de,
            ttl_ms: 10 * 60 * 1_000,
            max_attempts: 5,
        }
    }
}

/// The issued code plus its attempt counter. Removed from the trip entity on
/// successful verification (single use).
#[derive(Debug, Clone, Component)]
pub struct PickupOtp {
    pub code: String,
    pub expires_at: u64,
    pub attempts: u8,
    pub max_attempts: u8,
    pub invalidated: bool,
}

/// Generate a 4-digit pickup code for a trip. Seeded per trip and issue time
/// so tests are deterministic while distinct trips get distinct codes.
pub fn generate(trip: Entity, config: &OtpConfig, now: u64) -> PickupOtp {
    let mut rng = StdRng::seed_from_u64(config.seed ^ trip.to_bits() ^ now);
    let code: u16 = rng.gen_range(1000..=9999);
    PickupOtp {
        code: code.to_string(),
        expires_at: now + config.ttl_ms,
        attempts: 0,
        max_attempts: config.max_attempts,
        invalidated: false,
    }
}

impl PickupOtp {
    /// Check a submitted code. A wrong code burns one attempt; reaching the
    /// cap invalidates the code entirely. The caller removes the component
    /// on `Ok` so the code is single-use.
    pub fn verify(&mut self, code: &str, now: u64) -> Result<(), OtpError> {
        if self.invalidated {
            return Err(OtpError::Invalidated);
        }
        if now >= self.expires_at {
            return Err(OtpError::Expired);
        }
        if self.code != code {
            self.attempts += 1;
            if self.attempts >= self.max_attempts {
                self.invalidated = true;
                return Err(OtpError::Invalidated);
            }
            return Err(OtpError::Mismatch {
                attempts_left: self.max_attempts - self.attempts,
            });
        }
        Ok(())
    }
}
