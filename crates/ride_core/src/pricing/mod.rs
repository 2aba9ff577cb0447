//! Tenant-scoped pricing configuration: rate rules, surge zones, coupons.
//!
//! Rate rules and coupons are supplied by the onboarding subsystem; the core
//! only reads them. The one thing pricing writes is the coupon redemption
//! log, so usage caps are enforceable without recomputation.

pub mod engine;

use std::collections::HashSet;

use bevy_ecs::prelude::{Component, Entity, Resource};
use h3o::CellIndex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ecs::{CityId, Currency, TenantId, VehicleCategory};

pub use engine::{finalize_fare, quote};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("no effective rate rule for tenant {tenant:?} city {city:?} category {category:?}")]
    NoRateRule {
        tenant: TenantId,
        city: CityId,
        category: VehicleCategory,
    },
}

/// One tenant's pricing for a city/category, valid for an effective window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRule {
    pub tenant: TenantId,
    pub city: CityId,
    pub category: VehicleCategory,
    pub currency: Currency,
    pub base_fare: Decimal,
    pub per_km: Decimal,
    pub per_minute: Decimal,
    pub tax_percent: Decimal,
    pub effective_from: u64,
    pub effective_to: Option<u64>,
}

#[derive(Debug, Clone, Default, Resource)]
pub struct RateCard {
    pub rules: Vec<RateRule>,
}

impl RateCard {
    /// Currently-effective rule: `effective_from <= now < effective_to`,
    /// most recent `effective_from` wins.
    pub fn resolve(
        &self,
        tenant: TenantId,
        city: CityId,
        category: VehicleCategory,
        now: u64,
    ) -> Option<&RateRule> {
        self.rules
            .iter()
            .filter(|rule| {
                rule.tenant == tenant
                    && rule.city == city
                    && rule.category == category
                    && rule.effective_from <= now
                    && rule.effective_to.map_or(true, |to| now < to)
            })
            .max_by_key(|rule| rule.effective_from)
    }
}

/// A tenant-defined zone (as a set of H3 cells) with a surge multiplier
/// active for a time window.
#[derive(Debug, Clone)]
pub struct SurgeZone {
    pub tenant: TenantId,
    pub city: CityId,
    pub category: VehicleCategory,
    pub cells: HashSet<CellIndex>,
    pub multiplier: Decimal,
    pub active_from: u64,
    pub active_to: Option<u64>,
}

#[derive(Debug, Clone, Default, Resource)]
pub struct SurgeZones {
    pub zones: Vec<SurgeZone>,
}

impl SurgeZones {
    /// Highest active multiplier whose zone contains the pickup point.
    pub fn resolve(
        &self,
        tenant: TenantId,
        city: CityId,
        category: VehicleCategory,
        pickup: CellIndex,
        now: u64,
    ) -> Option<Decimal> {
        self.zones
            .iter()
            .filter(|zone| {
                zone.tenant == tenant
                    && zone.city == city
                    && zone.category == category
                    && zone.active_from <= now
                    && zone.active_to.map_or(true, |to| now < to)
                    && zone.cells.contains(&pickup)
            })
            .map(|zone| zone.multiplier)
            .max()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Discount {
    Flat(Decimal),
    Percent { percent: Decimal, max: Option<Decimal> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub tenant: TenantId,
    /// `None` applies in every city of the tenant.
    pub city: Option<CityId>,
    /// Empty applies to every category.
    pub categories: Vec<VehicleCategory>,
    pub discount: Discount,
    /// Minimum pre-tax fare for the coupon to apply.
    pub min_fare: Decimal,
    pub global_cap: Option<u32>,
    pub per_rider_cap: Option<u32>,
    pub active_from: u64,
    pub active_to: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CouponRedemption {
    pub code: String,
    pub rider: Entity,
    pub trip: Entity,
    pub amount: Decimal,
    pub redeemed_at: u64,
}

/// Coupons plus their redemption log (append-only).
#[derive(Debug, Clone, Default, Resource)]
pub struct CouponBook {
    pub coupons: Vec<Coupon>,
    pub redemptions: Vec<CouponRedemption>,
}

impl CouponBook {
    pub fn redemption_count(&self, code: &str) -> u32 {
        self.redemptions.iter().filter(|r| r.code == code).count() as u32
    }

    pub fn rider_redemption_count(&self, code: &str, rider: Entity) -> u32 {
        self.redemptions
            .iter()
            .filter(|r| r.code == code && r.rider == rider)
            .count() as u32
    }
}

/// Deterministic fare breakdown. Created once per trip at completion
/// (insertion-only); the quote at request time uses the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FareBreakdown {
    pub currency: Currency,
    pub base_fare: Decimal,
    pub distance_charge: Decimal,
    pub time_charge: Decimal,
    pub surge_multiplier: Decimal,
    /// Post-surge, pre-tax, pre-discount.
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub coupon: Option<String>,
    /// `subtotal − discount + tax`, rounded once to minor units.
    pub final_fare: Decimal,
}

/// The rider-facing estimate computed at request time.
#[derive(Debug, Clone, PartialEq, Eq, Component)]
pub struct EstimatedFare(pub FareBreakdown);

/// The frozen fare computed at trip completion. Read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Component)]
pub struct Fare(pub FareBreakdown);
