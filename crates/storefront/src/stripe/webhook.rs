//! Webhook signature verification.
//!
//! <https://docs.stripe.com/webhooks#verify-manually>

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::StripeError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// A webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// `data.object.id`, if present.
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(serde_json::Value::as_str)
    }

    /// `data.object.last_payment_error.message`, if present.
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        self.data
            .object
            .get("last_payment_error")?
            .get("message")?
            .as_str()
    }
}

/// Check a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=...]`) against
/// `payload` at time `now` (Unix seconds).
///
/// # Errors
///
/// Returns `StripeError::InvalidSignature` if the header is malformed, the
/// timestamp is outside the tolerance, or no `v1` signature matches.
pub fn verify_webhook_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), StripeError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| StripeError::InvalidSignature("missing timestamp".to_string()))?;
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| StripeError::InvalidSignature("invalid timestamp".to_string()))?;

    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(StripeError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }
    if signatures.is_empty() {
        return Err(StripeError::InvalidSignature(
            "no v1 signature".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| StripeError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if signatures
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate))
    {
        tracing::debug!("Webhook signature verified");
        Ok(())
    } else {
        Err(StripeError::InvalidSignature(
            "signature mismatch".to_string(),
        ))
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

/// Build a valid signature header. Used by tests.
#[cfg(test)]
pub(crate) fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("valid key length");
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_valid_signature() {
        let header = sign(PAYLOAD, SECRET, 1_000);
        assert!(verify_webhook_signature(PAYLOAD, &header, SECRET, 1_100).is_ok());
    }

    #[test]
    fn test_any_matching_v1_is_accepted() {
        let header = sign(PAYLOAD, SECRET, 1_000);
        let header = header.replacen("v1=", "v1=deadbeef,v1=", 1);
        assert!(verify_webhook_signature(PAYLOAD, &header, SECRET, 1_000).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = sign(PAYLOAD, SECRET, 1_000);
        let result = verify_webhook_signature("{}", &header, SECRET, 1_000);
        assert!(matches!(result, Err(StripeError::InvalidSignature(_))));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = sign(PAYLOAD, SECRET, 1_000);
        assert!(verify_webhook_signature(PAYLOAD, &header, SECRET, 1_301).is_err());
        assert!(verify_webhook_signature(PAYLOAD, &header, SECRET, 1_300).is_ok());
    }

    #[test]
    fn test_malformed_header_rejected() {
        assert!(verify_webhook_signature(PAYLOAD, "garbage", SECRET, 0).is_err());
        assert!(verify_webhook_signature(PAYLOAD, "t=abc,v1=00", SECRET, 0).is_err());
        assert!(verify_webhook_signature(PAYLOAD, "t=0", SECRET, 0).is_err());
    }

    #[test]
    fn test_event_accessors() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"id":"evt_2","type":"payment_intent.payment_failed","data":{"object":{"id":"pi_2","last_payment_error":{"message":"Card declined"}}}}"#,
        )
        .unwrap();
        assert_eq!(event.object_id(), Some("pi_2"));
        assert_eq!(event.failure_message(), Some("Card declined"));
    }
}
