//! Hosted checkout routes.
//!
//! Unlike the embedded payment form, the hosted page never collects an
//! address we can check afterwards, so the coordinate gate is mandatory
//! here: a request without a usable location is refused.

use amor_chai_core::delivery::OUTSIDE_RADIUS_MESSAGE;
use amor_chai_core::{CheckoutSessionStatus, DeliveryAddress, to_minor_units};
use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderMap, header::ORIGIN},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::payments::{EMPTY_CART_MESSAGE, OrderLine, require_stripe};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::state::AppState;
use crate::stripe::CheckoutLineItem;

pub const NO_VALID_ITEMS_MESSAGE: &str = "No valid items.";
pub const MISSING_SESSION_ID_MESSAGE: &str = "Session ID is required.";

/// Name used for a line without one.
const FALLBACK_ITEM_NAME: &str = "Item";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub location: Option<DeliveryAddress>,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutUrlResponse {
    pub url: String,
}

/// Hosted checkout line for an order line. Lines that would charge nothing
/// are dropped.
fn checkout_line(line: &OrderLine) -> Option<CheckoutLineItem> {
    let unit_amount = to_minor_units(line.unit_price()).filter(|cents| *cents > 0)?;
    Some(CheckoutLineItem {
        name: line
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_ITEM_NAME)
            .to_string(),
        image: line.image.clone().filter(|image| !image.is_empty()),
        unit_amount,
        quantity: line.quantity(),
    })
}

/// `requested` if it is an absolute http(s) URL, otherwise `fallback`.
fn redirect_url(requested: Option<&str>, fallback: String) -> String {
    requested
        .filter(|url| url.starts_with("http"))
        .map_or(fallback, String::from)
}

/// Create a hosted checkout session.
///
/// # Route
///
/// `POST /api/checkout`
#[instrument(skip_all, fields(lines = tracing::field::Empty))]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutUrlResponse>> {
    let Json(request) = body?;
    tracing::Span::current().record("lines", request.items.len());

    if request.items.is_empty() {
        return Err(AppError::BadRequest(EMPTY_CART_MESSAGE.to_string()));
    }
    let stripe = require_stripe(&state)?;

    let location = request.location.unwrap_or_default();
    let zone = state.zone().check(location.lat, location.lng);
    if !zone.allowed {
        tracing::info!("Hosted checkout refused outside delivery zone");
        return Err(AppError::OutsideZone(
            zone.message
                .unwrap_or_else(|| OUTSIDE_RADIUS_MESSAGE.to_string()),
        ));
    }

    let line_items: Vec<CheckoutLineItem> =
        request.items.iter().filter_map(checkout_line).collect();
    if line_items.is_empty() {
        return Err(AppError::BadRequest(NO_VALID_ITEMS_MESSAGE.to_string()));
    }

    let origin = headers
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .filter(|origin| !origin.is_empty())
        .unwrap_or(state.config().base_url.as_str());
    let success_url = redirect_url(
        request.success_url.as_deref(),
        format!("{origin}/?checkout=success"),
    );
    let cancel_url = redirect_url(
        request.cancel_url.as_deref(),
        format!("{origin}/?checkout=cancel"),
    );

    let session = stripe
        .create_checkout_session(&line_items, &success_url, &cancel_url)
        .await?;
    add_breadcrumb(
        "payment",
        "Checkout session created",
        &[("session_id", session.id.as_str())],
    );

    let url = session.url.ok_or_else(|| {
        AppError::Internal(format!("checkout session {} has no url", session.id))
    })?;
    Ok(Json(CheckoutUrlResponse { url }))
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub status: Option<CheckoutSessionStatus>,
    pub customer_email: Option<String>,
}

/// Status and customer email of a hosted checkout session.
///
/// # Route
///
/// `GET /api/stripe/checkout-session?session_id=...`
#[instrument(skip_all)]
pub async fn checkout_session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionStatusResponse>> {
    let Some(session_id) = query.session_id.filter(|id| !id.trim().is_empty()) else {
        return Err(AppError::BadRequest(MISSING_SESSION_ID_MESSAGE.to_string()));
    };

    let session = require_stripe(&state)?
        .retrieve_checkout_session(&session_id)
        .await?;

    Ok(Json(SessionStatusResponse {
        customer_email: session.customer_email().map(String::from),
        status: session.status,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_checkout_line_drops_free_items() {
        let free = OrderLine {
            price: Some(Decimal::ZERO),
            ..OrderLine::default()
        };
        assert!(checkout_line(&free).is_none());
        assert!(checkout_line(&OrderLine::default()).is_none());

        let negative = OrderLine {
            price: Some(Decimal::new(-100, 2)),
            ..OrderLine::default()
        };
        assert!(checkout_line(&negative).is_none());
    }

    #[test]
    fn test_checkout_line_defaults() {
        let line = OrderLine {
            name: Some("  ".to_string()),
            price: Some(Decimal::new(499, 2)),
            image: Some(String::new()),
            qty: Some(0),
            ..OrderLine::default()
        };
        let item = checkout_line(&line).unwrap();
        assert_eq!(item.name, "Item");
        assert_eq!(item.image, None);
        assert_eq!(item.unit_amount, 499);
        assert_eq!(item.quantity, 1);
    }

    #[test]
    fn test_redirect_url_requires_absolute_http() {
        let fallback = || "https://amor.test/?checkout=success".to_string();
        assert_eq!(
            redirect_url(Some("https://amor.test/thanks"), fallback()),
            "https://amor.test/thanks"
        );
        assert_eq!(redirect_url(Some("/thanks"), fallback()), fallback());
        assert_eq!(redirect_url(None, fallback()), fallback());
    }
}
