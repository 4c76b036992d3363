//! Stripe webhook receiver.
//!
//! Events are verified and logged. Fulfillment happens outside this service,
//! so every verified event is acknowledged.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::{AppError, Result, add_breadcrumb};
use crate::state::AppState;
use crate::stripe::WebhookEvent;

/// Header carrying the delivery signature.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub const MISSING_SIGNATURE_MESSAGE: &str = "Webhook secret or signature not found.";

/// What a verified event means for the shop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    CheckoutCompleted,
    CheckoutExpired,
    PaymentSucceeded,
    PaymentFailed,
    Unhandled,
}

impl WebhookDisposition {
    #[must_use]
    pub fn of(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => Self::CheckoutCompleted,
            "checkout.session.expired" => Self::CheckoutExpired,
            "payment_intent.succeeded" => Self::PaymentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentFailed,
            _ => Self::Unhandled,
        }
    }
}

/// Log a verified event.
fn handle_event(event: &WebhookEvent) -> WebhookDisposition {
    let object_id = event.object_id().unwrap_or_default();
    let disposition = WebhookDisposition::of(&event.event_type);

    match disposition {
        WebhookDisposition::CheckoutCompleted => {
            tracing::info!(session_id = object_id, "Checkout session completed");
        }
        WebhookDisposition::CheckoutExpired => {
            tracing::info!(session_id = object_id, "Checkout session expired");
        }
        WebhookDisposition::PaymentSucceeded => {
            tracing::info!(payment_intent = object_id, "Payment intent succeeded");
        }
        WebhookDisposition::PaymentFailed => {
            tracing::warn!(
                payment_intent = object_id,
                reason = event.failure_message().unwrap_or("unknown"),
                "Payment intent failed"
            );
        }
        WebhookDisposition::Unhandled => {
            tracing::info!(event_type = %event.event_type, "Unhandled webhook event type");
        }
    }

    disposition
}

/// Verify and acknowledge a Stripe event.
///
/// # Route
///
/// `POST /api/webhooks`
#[instrument(skip_all, fields(event_id = tracing::field::Empty))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let stripe = state.stripe().filter(|stripe| stripe.has_webhook_secret());

    let (Some(stripe), Some(signature)) = (stripe, signature) else {
        return Err(AppError::BadRequest(MISSING_SIGNATURE_MESSAGE.to_string()));
    };

    let payload = std::str::from_utf8(&body)
        .map_err(|_| AppError::BadRequest("Webhook error: payload is not UTF-8".to_string()))?;

    let event = stripe.construct_event(payload, signature).map_err(|err| {
        tracing::warn!(error = %err, "Webhook signature verification failed");
        AppError::BadRequest(format!("Webhook error: {err}"))
    })?;

    tracing::Span::current().record("event_id", event.id.as_str());
    add_breadcrumb(
        "webhook",
        "Stripe event received",
        &[("type", event.event_type.as_str())],
    );
    handle_event(&event);

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_by_type() {
        assert_eq!(
            WebhookDisposition::of("checkout.session.completed"),
            WebhookDisposition::CheckoutCompleted
        );
        assert_eq!(
            WebhookDisposition::of("payment_intent.payment_failed"),
            WebhookDisposition::PaymentFailed
        );
        assert_eq!(
            WebhookDisposition::of("customer.created"),
            WebhookDisposition::Unhandled
        );
    }

    #[test]
    fn test_handle_failed_payment_event() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "data": {"object": {"id": "pi_1", "last_payment_error": {"message": "Card declined"}}}
        }))
        .unwrap();
        assert_eq!(handle_event(&event), WebhookDisposition::PaymentFailed);
    }
}
