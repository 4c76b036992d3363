//! Stripe API client.
//!
//! # Architecture
//!
//! - Form-encoded REST calls over `reqwest`, authenticated with the secret key
//! - Payment intents for the embedded payment form, checkout sessions for the
//!   hosted checkout page
//! - Payment intents in a terminal status are cached via `moka` (5 minute TTL)
//!   so return-page polling does not hit the API repeatedly
//!
//! # Example
//!
//! ```rust,ignore
//! use amor_chai_storefront::stripe::StripeClient;
//!
//! let client = StripeClient::new(&stripe_config)?;
//! let intent = client.create_payment_intent(2700, CurrencyCode::USD).await?;
//! println!("{}", intent.client_secret.unwrap_or_default());
//! ```

mod webhook;

pub use webhook::{SIGNATURE_TOLERANCE_SECS, WebhookEvent, verify_webhook_signature};

use std::sync::Arc;
use std::time::Duration;

use amor_chai_core::{CheckoutSessionStatus, CurrencyCode, PaymentStatus};
use moka::future::Cache;
use reqwest::{Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::instrument;

use crate::config::StripeConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when talking to Stripe.
#[derive(Debug, Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error object.
    #[error("Stripe API error {status}: {message}")]
    Api {
        status: u16,
        /// Stripe error type, e.g. `invalid_request_error`, `card_error`.
        kind: Option<String>,
        code: Option<String>,
        message: String,
    },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Client secret is not of the form `pi_..._secret_...`.
    #[error("Invalid payment intent client secret")]
    InvalidClientSecret,

    /// Webhook signature missing, malformed, stale, or wrong.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
}

impl StripeError {
    /// The request referenced something that does not exist or was malformed.
    #[must_use]
    pub fn is_invalid_request(&self) -> bool {
        match self {
            Self::Api { kind, status, .. } => {
                kind.as_deref() == Some("invalid_request_error") || *status == 404
            }
            Self::InvalidClientSecret => true,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorObject,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

// =============================================================================
// Resources
// =============================================================================

/// A payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: PaymentStatus,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub message: Option<String>,
}

/// A hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<CheckoutSessionStatus>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
}

impl CheckoutSession {
    #[must_use]
    pub fn customer_email(&self) -> Option<&str> {
        self.customer_details.as_ref()?.email.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

/// One line of a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub image: Option<String>,
    /// Unit price in minor units.
    pub unit_amount: i64,
    pub quantity: u32,
}

/// The payment intent id embedded in a client secret
/// (`pi_123_secret_456` → `pi_123`).
///
/// # Errors
///
/// Returns `StripeError::InvalidClientSecret` if the secret has no id part.
pub fn payment_intent_id(client_secret: &str) -> Result<&str, StripeError> {
    let id = client_secret
        .split("_secret_")
        .next()
        .unwrap_or_default()
        .trim();
    if id.is_empty() {
        return Err(StripeError::InvalidClientSecret);
    }
    Ok(id)
}

/// Form fields for creating a checkout session.
fn checkout_session_form(
    line_items: &[CheckoutLineItem],
    currency: CurrencyCode,
    success_url: &str,
    cancel_url: &str,
) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), success_url.to_string()),
        ("cancel_url".to_string(), cancel_url.to_string()),
    ];

    for (i, item) in line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            currency.processor_code().to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.name.clone(),
        ));
        if let Some(image) = &item.image {
            form.push((
                format!("{prefix}[price_data][product_data][images][0]"),
                image.clone(),
            ));
        }
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }

    form
}

// =============================================================================
// StripeClient
// =============================================================================

/// Client for the Stripe REST API.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    http: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
    webhook_secret: Option<SecretString>,
    intents: Cache<String, PaymentIntent>,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.inner.api_base)
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl StripeClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, StripeError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let intents = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Ok(Self {
            inner: Arc::new(StripeClientInner {
                http,
                api_base: config.api_base.trim_end_matches('/').to_string(),
                secret_key: config.secret_key.clone(),
                webhook_secret: config.webhook_secret.clone(),
                intents,
            }),
        })
    }

    /// Whether webhook verification is configured.
    #[must_use]
    pub fn has_webhook_secret(&self) -> bool {
        self.inner.webhook_secret.is_some()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.inner
            .http
            .request(method, format!("{}/v1/{path}", self.inner.api_base))
            .basic_auth(self.inner.secret_key.expose_secret(), None::<&str>)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, StripeError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let error = serde_json::from_str::<ErrorEnvelope>(&text).ok();
            tracing::warn!(
                status = status.as_u16(),
                kind = error.as_ref().and_then(|e| e.error.kind.as_deref()).unwrap_or(""),
                "Stripe returned non-success status"
            );
            return Err(error.map_or_else(
                || StripeError::Api {
                    status: status.as_u16(),
                    kind: None,
                    code: None,
                    message: text.chars().take(200).collect(),
                },
                |e| StripeError::Api {
                    status: status.as_u16(),
                    kind: e.error.kind,
                    code: e.error.code,
                    message: e.error.message.unwrap_or_default(),
                },
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Stripe response");
            StripeError::Parse(e.to_string())
        })
    }

    /// Create a payment intent with automatic payment methods enabled.
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails.
    #[instrument(skip(self))]
    pub async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: CurrencyCode,
    ) -> Result<PaymentIntent, StripeError> {
        let form = [
            ("amount", amount_cents.to_string()),
            ("currency", currency.processor_code().to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        let response = self
            .request(Method::POST, "payment_intents")
            .form(&form)
            .send()
            .await?;
        let intent: PaymentIntent = Self::parse(response).await?;

        tracing::info!(payment_intent = %intent.id, amount_cents, "Created payment intent");
        Ok(intent)
    }

    /// Fetch a payment intent by id.
    ///
    /// # Errors
    ///
    /// Returns error if the intent does not exist or the API call fails.
    #[instrument(skip(self))]
    pub async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, StripeError> {
        if let Some(intent) = self.inner.intents.get(id).await {
            tracing::debug!("Payment intent cache hit");
            return Ok(intent);
        }

        let response = self
            .request(Method::GET, &format!("payment_intents/{id}"))
            .send()
            .await?;
        let intent: PaymentIntent = Self::parse(response).await?;

        if intent.status.is_terminal() {
            self.inner
                .intents
                .insert(id.to_string(), intent.clone())
                .await;
        }
        Ok(intent)
    }

    /// Status of the payment intent a client secret belongs to.
    ///
    /// # Errors
    ///
    /// Returns `StripeError::InvalidClientSecret` for a malformed secret, or
    /// the API error.
    pub async fn payment_intent_status(
        &self,
        client_secret: &str,
    ) -> Result<PaymentStatus, StripeError> {
        let id = payment_intent_id(client_secret)?;
        Ok(self.retrieve_payment_intent(id).await?.status)
    }

    /// Create a hosted checkout session.
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails.
    #[instrument(skip(self, line_items), fields(lines = line_items.len()))]
    pub async fn create_checkout_session(
        &self,
        line_items: &[CheckoutLineItem],
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, StripeError> {
        let form = checkout_session_form(line_items, CurrencyCode::USD, success_url, cancel_url);
        let response = self
            .request(Method::POST, "checkout/sessions")
            .form(&form)
            .send()
            .await?;
        let session: CheckoutSession = Self::parse(response).await?;

        tracing::info!(session_id = %session.id, "Created checkout session");
        Ok(session)
    }

    /// Fetch a checkout session by id.
    ///
    /// # Errors
    ///
    /// Returns error if the session does not exist or the API call fails.
    #[instrument(skip(self))]
    pub async fn retrieve_checkout_session(
        &self,
        id: &str,
    ) -> Result<CheckoutSession, StripeError> {
        let response = self
            .request(Method::GET, &format!("checkout/sessions/{id}"))
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Verify and parse a webhook delivery.
    ///
    /// # Errors
    ///
    /// Returns `StripeError::InvalidSignature` if no webhook secret is
    /// configured or the signature does not check out.
    pub fn construct_event(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> Result<WebhookEvent, StripeError> {
        let secret = self
            .inner
            .webhook_secret
            .as_ref()
            .ok_or_else(|| StripeError::InvalidSignature("webhook secret not configured".to_string()))?;

        let now = chrono::Utc::now().timestamp();
        verify_webhook_signature(payload, signature_header, secret.expose_secret(), now)?;
        serde_json::from_str(payload).map_err(|e| StripeError::Parse(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_intent_id_from_client_secret() {
        assert_eq!(payment_intent_id("pi_123_secret_456").unwrap(), "pi_123");
        assert_eq!(payment_intent_id("pi_123").unwrap(), "pi_123");
        assert!(matches!(
            payment_intent_id("_secret_456"),
            Err(StripeError::InvalidClientSecret)
        ));
    }

    #[test]
    fn test_checkout_session_form_layout() {
        let form = checkout_session_form(
            &[CheckoutLineItem {
                name: "Matcha".to_string(),
                image: None,
                unit_amount: 550,
                quantity: 2,
            }],
            CurrencyCode::USD,
            "https://shop.test/?checkout=success",
            "https://shop.test/?checkout=cancel",
        );
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("usd"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("550"));
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
        assert_eq!(get("line_items[0][price_data][product_data][images][0]"), None);
    }

    #[test]
    fn test_payment_intent_parses() {
        let intent: PaymentIntent = serde_json::from_str(
            r#"{"id":"pi_1","object":"payment_intent","client_secret":"pi_1_secret_x","status":"requires_payment_method","amount":2700,"currency":"usd"}"#,
        )
        .unwrap();
        assert_eq!(intent.status, PaymentStatus::RequiresPaymentMethod);
        assert_eq!(intent.amount, 2700);
    }

    #[test]
    fn test_checkout_session_customer_email() {
        let session: CheckoutSession = serde_json::from_str(
            r#"{"id":"cs_1","status":"complete","customer_details":{"email":"a@example.com"}}"#,
        )
        .unwrap();
        assert_eq!(session.status, Some(CheckoutSessionStatus::Complete));
        assert_eq!(session.customer_email(), Some("a@example.com"));
    }

    #[test]
    fn test_invalid_request_detection() {
        let err = StripeError::Api {
            status: 400,
            kind: Some("invalid_request_error".to_string()),
            code: Some("resource_missing".to_string()),
            message: "No such payment_intent".to_string(),
        };
        assert!(err.is_invalid_request());
        assert!(StripeError::InvalidClientSecret.is_invalid_request());

        let err = StripeError::Api {
            status: 500,
            kind: Some("api_error".to_string()),
            code: None,
            message: String::new(),
        };
        assert!(!err.is_invalid_request());
    }
}
