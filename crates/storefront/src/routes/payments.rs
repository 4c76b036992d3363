//! Payment intent routes for the embedded payment form.
//!
//! The intent is created before the customer has entered an address, so the
//! coordinate gate only applies when the request already carries a location.
//! The return page polls the intent status after the payment redirect.

use amor_chai_core::delivery::OUTSIDE_RADIUS_MESSAGE;
use amor_chai_core::{DeliveryAddress, OrderTotals, PaymentStatus};
use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{AppError, Result, add_breadcrumb};
use crate::state::AppState;
use crate::stripe::StripeClient;

pub const EMPTY_CART_MESSAGE: &str = "Cart is empty.";
pub const INVALID_TOTAL_MESSAGE: &str = "Invalid cart total.";
pub const MISSING_CLIENT_SECRET_MESSAGE: &str = "Client secret is required.";
pub const INVALID_PAYMENT_INTENT_MESSAGE: &str = "Invalid payment intent provided.";
pub const STRIPE_NOT_CONFIGURED_MESSAGE: &str =
    "Stripe is not configured. Please set STRIPE_SECRET_KEY in .env";

/// One cart line as sent by the browser.
///
/// Every field is optional so a partially filled line is priced rather
/// than rejecting the whole order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderLine {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub qty: Option<u32>,
}

impl OrderLine {
    /// Unit price, zero when absent.
    #[must_use]
    pub fn unit_price(&self) -> Decimal {
        self.price.unwrap_or(Decimal::ZERO)
    }

    /// Quantity, one when absent or zero.
    #[must_use]
    pub fn quantity(&self) -> u32 {
        self.qty.filter(|qty| *qty > 0).unwrap_or(1)
    }
}

/// Sum of `price * qty` over all lines, or `None` if it overflows.
#[must_use]
pub fn subtotal(lines: &[OrderLine]) -> Option<Decimal> {
    lines.iter().try_fold(Decimal::ZERO, |acc, line| {
        let line_total = line
            .unit_price()
            .checked_mul(Decimal::from(line.quantity()))?;
        acc.checked_add(line_total)
    })
}

/// Totals for a browser order. Any arithmetic failure is an invalid total.
fn order_totals(lines: &[OrderLine]) -> Result<(OrderTotals, i64)> {
    let invalid = || AppError::BadRequest(INVALID_TOTAL_MESSAGE.to_string());
    let subtotal = subtotal(lines).ok_or_else(invalid)?;
    let totals = OrderTotals::from_subtotal(subtotal).map_err(|_| invalid())?;
    let amount_cents = totals.amount_cents().map_err(|_| invalid())?;
    Ok((totals, amount_cents))
}

/// The Stripe client, or the configuration error every payment route reports.
pub(super) fn require_stripe(state: &AppState) -> Result<&StripeClient> {
    state
        .stripe()
        .ok_or_else(|| AppError::NotConfigured(STRIPE_NOT_CONFIGURED_MESSAGE.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentIntentRequest {
    #[serde(default)]
    pub items: Vec<OrderLine>,
    /// Only `lat` and `lng` are read.
    #[serde(default)]
    pub location: Option<DeliveryAddress>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSecretResponse {
    pub client_secret: String,
}

/// Create a payment intent for the cart total plus tax.
///
/// # Route
///
/// `POST /api/create-payment-intent`
#[instrument(skip_all, fields(lines = tracing::field::Empty))]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreatePaymentIntentRequest>, JsonRejection>,
) -> Result<Json<ClientSecretResponse>> {
    let Json(request) = body?;
    tracing::Span::current().record("lines", request.items.len());

    if request.items.is_empty() {
        return Err(AppError::BadRequest(EMPTY_CART_MESSAGE.to_string()));
    }

    if let Some(point) = request.location.as_ref().and_then(DeliveryAddress::coordinate)
        && !state.zone().contains(point)
    {
        tracing::info!("Payment intent refused outside delivery zone");
        return Err(AppError::OutsideZone(OUTSIDE_RADIUS_MESSAGE.to_string()));
    }

    let (totals, amount_cents) = order_totals(&request.items)?;

    let stripe = require_stripe(&state)?;
    let intent = stripe
        .create_payment_intent(amount_cents, totals.currency)
        .await?;
    add_breadcrumb(
        "payment",
        "Payment intent created",
        &[("payment_intent", intent.id.as_str())],
    );

    let client_secret = intent.client_secret.ok_or_else(|| {
        AppError::Internal(format!("payment intent {} has no client secret", intent.id))
    })?;
    Ok(Json(ClientSecretResponse { client_secret }))
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusQuery {
    pub payment_intent_client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub status: PaymentStatus,
}

/// Status of the payment intent a client secret belongs to.
///
/// # Route
///
/// `GET /api/payment-intent-status?payment_intent_client_secret=...`
#[instrument(skip_all)]
pub async fn payment_intent_status(
    State(state): State<AppState>,
    Query(query): Query<PaymentStatusQuery>,
) -> Result<Json<PaymentStatusResponse>> {
    let Some(client_secret) = query
        .payment_intent_client_secret
        .filter(|secret| !secret.trim().is_empty())
    else {
        return Err(AppError::BadRequest(MISSING_CLIENT_SECRET_MESSAGE.to_string()));
    };

    let stripe = require_stripe(&state)?;
    let status = stripe
        .payment_intent_status(&client_secret)
        .await
        .map_err(|err| {
            if err.is_invalid_request() {
                tracing::info!(error = %err, "Unknown payment intent");
                AppError::BadRequest(INVALID_PAYMENT_INTENT_MESSAGE.to_string())
            } else {
                err.into()
            }
        })?;

    Ok(Json(PaymentStatusResponse { status }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(price: &str, qty: Option<u32>) -> OrderLine {
        OrderLine {
            price: Some(price.parse().unwrap()),
            qty,
            ..OrderLine::default()
        }
    }

    #[test]
    fn test_subtotal_defaults_quantity_to_one() {
        let lines = [line("10", Some(2)), line("5", None), line("1.50", Some(0))];
        assert_eq!(subtotal(&lines), Some(Decimal::new(2650, 2)));
    }

    #[test]
    fn test_missing_price_counts_as_zero() {
        let lines = [OrderLine::default()];
        assert!(matches!(
            order_totals(&lines),
            Err(AppError::BadRequest(message)) if message == INVALID_TOTAL_MESSAGE
        ));
    }

    #[test]
    fn test_order_line_parses_browser_cart_item() {
        let line: OrderLine = serde_json::from_value(serde_json::json!({
            "id": "classic-chai",
            "name": "Classic Chai",
            "price": 4.99,
            "image": "/classic.png",
            "qty": 3
        }))
        .unwrap();
        assert_eq!(line.unit_price(), Decimal::new(499, 2));
        assert_eq!(line.quantity(), 3);
    }

    #[test]
    fn test_two_line_cart_total_in_cents() {
        let lines = [line("10", Some(2)), line("5", Some(1))];
        let (totals, amount_cents) = order_totals(&lines).unwrap();
        assert_eq!(totals.total, Decimal::new(2700, 2));
        assert_eq!(amount_cents, 2700);
    }

    #[test]
    fn test_oversized_prices_are_an_invalid_total() {
        let lines = [line("70000000000000000000000000000", Some(2))];
        assert_eq!(subtotal(&lines), None);
        assert!(matches!(
            order_totals(&lines),
            Err(AppError::BadRequest(message)) if message == INVALID_TOTAL_MESSAGE
        ));

        // The subtotal fits but tax pushes it over
        let lines = [line("75000000000000000000000000000", Some(1))];
        assert!(subtotal(&lines).is_some());
        assert!(order_totals(&lines).is_err());
    }
}
