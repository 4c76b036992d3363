//! Order totals.
//!
//! Tax is a flat 8% of the subtotal. The payment processor receives the
//! total in integer cents, rounded half away from zero.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::cart::Cart;
use crate::types::{CurrencyCode, to_minor_units};

/// Sales tax rate applied to every order (8%).
pub const TAX_RATE: Decimal = Decimal::from_parts(8, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("Invalid cart total.")]
    NonPositiveTotal,

    #[error("order total is too large")]
    Overflow,
}

/// Subtotal, tax, and total for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub currency: CurrencyCode,
}

impl OrderTotals {
    /// Compute totals from a subtotal.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::Overflow`] if tax or total overflow.
    pub fn from_subtotal(subtotal: Decimal) -> Result<Self, PricingError> {
        let tax = subtotal
            .checked_mul(TAX_RATE)
            .ok_or(PricingError::Overflow)?;
        let total = subtotal.checked_add(tax).ok_or(PricingError::Overflow)?;
        Ok(Self {
            subtotal,
            tax,
            total,
            currency: CurrencyCode::USD,
        })
    }

    /// Compute totals for a cart.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::Overflow`] if any sum overflows.
    pub fn for_cart(cart: &Cart) -> Result<Self, PricingError> {
        Self::from_subtotal(cart.checked_total().ok_or(PricingError::Overflow)?)
    }

    /// Total in integer cents, as sent to the payment processor.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::NonPositiveTotal`] if the total is zero or
    /// negative and [`PricingError::Overflow`] if it does not fit in an `i64`.
    pub fn amount_cents(&self) -> Result<i64, PricingError> {
        if self.total <= Decimal::ZERO {
            return Err(PricingError::NonPositiveTotal);
        }
        to_minor_units(self.total).ok_or(PricingError::Overflow)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cart::Product;

    #[test]
    fn test_tax_rate_is_eight_percent() {
        assert_eq!(TAX_RATE, Decimal::new(8, 2));
    }

    #[test]
    fn test_cart_to_cents() {
        let mut cart = Cart::new();
        let a = Product::new("a", "Chai", Decimal::new(10, 0), "/a.png");
        let b = Product::new("b", "Matcha", Decimal::new(5, 0), "/b.png");
        cart.add_item(a.clone());
        cart.add_item(a);
        cart.add_item(b);

        let totals = OrderTotals::for_cart(&cart).unwrap();
        assert_eq!(totals.subtotal, Decimal::new(25, 0));
        assert_eq!(totals.tax, Decimal::new(200, 2));
        assert_eq!(totals.total, Decimal::new(2700, 2));
        assert_eq!(totals.currency.format(totals.total), "$27.00");
        assert_eq!(totals.amount_cents().unwrap(), 2700);
    }

    #[test]
    fn test_cents_round_half_away_from_zero() {
        // 4.99 * 1.08 = 5.3892 -> 539 cents
        let totals = OrderTotals::from_subtotal(Decimal::new(499, 2)).unwrap();
        assert_eq!(totals.amount_cents().unwrap(), 539);

        // 0.625 * 1.08 = 0.675 -> 67.5 cents -> 68
        let totals = OrderTotals::from_subtotal(Decimal::new(625, 3)).unwrap();
        assert_eq!(totals.amount_cents().unwrap(), 68);
    }

    #[test]
    fn test_empty_total_is_rejected() {
        let totals = OrderTotals::for_cart(&Cart::new()).unwrap();
        assert_eq!(totals.amount_cents(), Err(PricingError::NonPositiveTotal));
        assert_eq!(
            PricingError::NonPositiveTotal.to_string(),
            "Invalid cart total."
        );
    }

    #[test]
    fn test_overflowing_subtotal_is_an_error() {
        assert_eq!(
            OrderTotals::from_subtotal(Decimal::MAX),
            Err(PricingError::Overflow)
        );

        // Fits in a Decimal but not in i64 cents
        let totals = OrderTotals::from_subtotal(Decimal::new(i64::MAX, 0)).unwrap();
        assert_eq!(totals.amount_cents(), Err(PricingError::Overflow));
    }
}
