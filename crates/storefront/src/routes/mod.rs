//! HTTP route handlers for the storefront API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                         - Liveness
//! GET  /health/ready                   - Readiness (payments configured)
//!
//! # Delivery zone
//! POST /api/verify-delivery-zone       - Postal-code gate
//!
//! # Payments (embedded form)
//! POST /api/create-payment-intent      - Create intent, returns clientSecret
//! GET  /api/payment-intent-status      - Intent status for the return page
//!
//! # Hosted checkout
//! POST /api/checkout                   - Create session, returns url
//! GET  /api/stripe/checkout-session    - Session status and customer email
//!
//! # Webhooks
//! POST /api/webhooks                   - Stripe events
//!
//! # Auth
//! GET  /auth/callback                  - Supabase code exchange, redirects
//! ```

pub mod auth_callback;
pub mod checkout;
pub mod delivery_zone;
pub mod health;
pub mod payments;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::middleware::{api_rate_limiter, payment_rate_limiter};
use crate::state::AppState;

/// Routes that create charges.
fn payment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/create-payment-intent",
            post(payments::create_payment_intent),
        )
        .route("/checkout", post(checkout::create_checkout_session))
}

/// Read-only and validation routes.
fn lookup_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/verify-delivery-zone",
            post(delivery_zone::verify_delivery_zone),
        )
        .route("/payment-intent-status", get(payments::payment_intent_status))
        .route(
            "/stripe/checkout-session",
            get(checkout::checkout_session_status),
        )
}

fn build(rate_limited: bool) -> Router<AppState> {
    let (payment, lookup) = if rate_limited {
        (
            payment_routes().layer(payment_rate_limiter()),
            lookup_routes().layer(api_rate_limiter()),
        )
    } else {
        (payment_routes(), lookup_routes())
    };

    let api = payment
        .merge(lookup)
        .route("/webhooks", post(webhooks::stripe_webhook));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/auth/callback", get(auth_callback::callback))
        .nest("/api", api)
}

/// All routes, without per-client rate limits.
///
/// Rate limiting keys on proxy headers, which in-process callers do not
/// send.
pub fn routes() -> Router<AppState> {
    build(false)
}

/// All routes with per-client rate limits, for serving behind the proxy.
pub fn rate_limited_routes() -> Router<AppState> {
    build(true)
}
