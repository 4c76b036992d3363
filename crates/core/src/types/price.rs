//! Money helpers using decimal arithmetic.
//!
//! Prices are carried as `rust_decimal::Decimal` in the currency's standard
//! unit (dollars, not cents) and only converted to minor units at the payment
//! processor boundary.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// ISO 4217 currency codes accepted by the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
}

impl CurrencyCode {
    /// Lowercase code as expected by the payment processor (`"usd"`).
    #[must_use]
    pub const fn processor_code(self) -> &'static str {
        match self {
            Self::USD => "usd",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::USD => "$",
        }
    }

    /// Format an amount for display (e.g. `"$27.00"`).
    #[must_use]
    pub fn format(self, amount: Decimal) -> String {
        format!(
            "{}{:.2}",
            self.symbol(),
            amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        )
    }
}

/// Convert an amount in standard units to integer minor units (cents).
///
/// Rounds half away from zero. Returns `None` if the result does not fit in
/// an `i64`.
#[must_use]
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
