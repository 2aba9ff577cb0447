//! Fare split math. The platform fee is taken off the final fare first, the
//! owner's share is cut from what remains, and the tenant keeps the rest so
//! the three parts always sum back to the fare.

use rust_decimal::Decimal;

use crate::money::{round_minor, ONE_HUNDRED};

use super::{CommissionKind, CommissionRule, SettlementError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FareSplit {
    /// Platform fee before tax is carved out of it.
    pub platform_gross: Decimal,
    pub owner_amount: Decimal,
    pub tenant_amount: Decimal,
}

fn apply_rule(rule: &CommissionRule, base: Decimal) -> Decimal {
    let raw = match rule.kind {
        CommissionKind::Flat(amount) => amount.min(base),
        CommissionKind::Percentage(percent) => base * percent.min(ONE_HUNDRED) / ONE_HUNDRED,
    };
    let capped = match rule.cap {
        Some(cap) => raw.min(cap),
        None => raw,
    };
    round_minor(capped.max(Decimal::ZERO))
}

/// Splits `final_fare` into platform / owner / tenant amounts. The tenant
/// amount is the exact remainder, so rounding never creates or destroys
/// money.
pub fn compute_split(
    final_fare: Decimal,
    platform_rule: &CommissionRule,
    owner_rule: &CommissionRule,
) -> Result<FareSplit, SettlementError> {
    let platform_gross = apply_rule(platform_rule, final_fare);
    let distributable = final_fare - platform_gross;
    let owner_amount = apply_rule(owner_rule, distributable);
    let tenant_amount = distributable - owner_amount;

    let total = platform_gross + owner_amount + tenant_amount;
    if total != final_fare {
        return Err(SettlementError::SplitInvariant {
            fare: final_fare,
            split: total,
        });
    }
    Ok(FareSplit {
        platform_gross,
        owner_amount,
        tenant_amount,
    })
}
