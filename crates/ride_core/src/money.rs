//! Money helpers. All monetary math is exact decimal; rounding happens once,
//! at the boundary where an amount becomes payable.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

pub const ONE_HUNDRED: Decimal = dec!(100);

/// Round to currency-minor-unit precision, half-up.
pub fn round_minor(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
