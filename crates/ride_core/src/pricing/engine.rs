//! Fare computation. Quote-time and completion-time fares share one code
//! path so an advertised estimate and the settled fare can only diverge
//! through surge or coupon timing, never through formula drift.

use bevy_ecs::prelude::Entity;
use h3o::CellIndex;
use rust_decimal::Decimal;

use crate::ecs::{CityId, TenantId, VehicleCategory};
use crate::money::{round_minor, ONE_HUNDRED};

use super::{
    Coupon, CouponBook, CouponRedemption, Discount, FareBreakdown, PricingError, RateCard,
    SurgeZones,
};

#[derive(Debug, Clone, Copy)]
pub struct FareInputs {
    pub tenant: TenantId,
    pub city: CityId,
    pub category: VehicleCategory,
    pub pickup: CellIndex,
    pub distance_km: Decimal,
    pub duration_min: Decimal,
}

/// Steps 1–4 of the fare procedure: rate resolution, subtotal, surge, tax.
fn compute(
    rates: &RateCard,
    surges: &SurgeZones,
    inputs: &FareInputs,
    discount: Decimal,
    coupon: Option<String>,
    now: u64,
) -> Result<FareBreakdown, PricingError> {
    let rule = rates
        .resolve(inputs.tenant, inputs.city, inputs.category, now)
        .ok_or(PricingError::NoRateRule {
            tenant: inputs.tenant,
            city: inputs.city,
            category: inputs.category,
        })?;

    let distance_charge = rule.per_km * inputs.distance_km;
    let time_charge = rule.per_minute * inputs.duration_min;
    let pre_surge = rule.base_fare + distance_charge + time_charge;

    let multiplier = surges
        .resolve(inputs.tenant, inputs.city, inputs.category, inputs.pickup, now)
        .unwrap_or(Decimal::ONE);
    let subtotal = pre_surge * multiplier;

    // Tax applies to the post-surge subtotal, before any coupon discount.
    let tax = subtotal * rule.tax_percent / ONE_HUNDRED;

    Ok(FareBreakdown {
        currency: rule.currency,
        base_fare: rule.base_fare,
        distance_charge,
        time_charge,
        surge_multiplier: multiplier,
        subtotal,
        tax,
        discount,
        coupon,
        final_fare: round_minor(subtotal - discount + tax),
    })
}

/// Rider-facing estimate. No coupon is applied at quote time.
pub fn quote(
    rates: &RateCard,
    surges: &SurgeZones,
    inputs: &FareInputs,
    now: u64,
) -> Result<FareBreakdown, PricingError> {
    compute(rates, surges, inputs, Decimal::ZERO, None, now)
}

fn coupon_applies(
    coupon: &Coupon,
    book: &CouponBook,
    inputs: &FareInputs,
    rider: Entity,
    pre_tax: Decimal,
    now: u64,
) -> bool {
    coupon.tenant == inputs.tenant
        && coupon.city.map_or(true, |city| city == inputs.city)
        && (coupon.categories.is_empty() || coupon.categories.contains(&inputs.category))
        && coupon.active_from <= now
        && coupon.active_to.map_or(true, |to| now < to)
        && pre_tax >= coupon.min_fare
        && coupon
            .global_cap
            .map_or(true, |cap| book.redemption_count(&coupon.code) < cap)
        && coupon.per_rider_cap.map_or(true, |cap| {
            book.rider_redemption_count(&coupon.code, rider) < cap
        })
}

fn discount_amount(coupon: &Coupon, pre_tax: Decimal) -> Decimal {
    let raw = match &coupon.discount {
        Discount::Flat(amount) => *amount,
        Discount::Percent { percent, max } => {
            let pct = pre_tax * *percent / ONE_HUNDRED;
            max.map_or(pct, |cap| pct.min(cap))
        }
    };
    round_minor(raw.min(pre_tax))
}

/// Completion-time fare: the quote formula plus the single best-matching
/// active coupon (highest discount, not first match). Applying a coupon
/// records a redemption row so usage caps are enforceable.
pub fn finalize_fare(
    rates: &RateCard,
    surges: &SurgeZones,
    coupons: &mut CouponBook,
    inputs: &FareInputs,
    rider: Entity,
    trip: Entity,
    now: u64,
) -> Result<FareBreakdown, PricingError> {
    let undiscounted = compute(rates, surges, inputs, Decimal::ZERO, None, now)?;
    let pre_tax = undiscounted.subtotal;

    let best = coupons
        .coupons
        .iter()
        .filter(|coupon| coupon_applies(coupon, coupons, inputs, rider, pre_tax, now))
        .map(|coupon| (discount_amount(coupon, pre_tax), coupon.code.clone()))
        .max_by(|a, b| a.0.cmp(&b.0));

    let Some((discount, code)) = best else {
        return Ok(undiscounted);
    };

    coupons.redemptions.push(CouponRedemption {
        code: code.clone(),
        rider,
        trip,
        amount: discount,
        redeemed_at: now,
    });

    compute(rates, surges, inputs, discount, Some(code), now)
}
