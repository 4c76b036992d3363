//! Client for the storefront's own HTTP API.

use std::time::Duration;

use amor_chai_core::{CartItem, Coordinate, DeliveryAddress, DeliveryZoneResult, PaymentStatus};
use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from calling the storefront API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an error.
    #[error("server error {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body was not what the route returns.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// The server refused payment because the location is outside the zone.
    #[must_use]
    pub const fn is_outside_zone(&self) -> bool {
        matches!(self, Self::Status { status: 403, .. })
    }
}

/// Calls the checkout depends on.
#[async_trait]
pub trait StorefrontApi: Send + Sync {
    /// Authoritative postal-code check.
    async fn verify_zone(&self, address: &DeliveryAddress) -> Result<DeliveryZoneResult, ApiError>;

    /// Create a payment intent for `items`. Returns the client secret.
    async fn create_payment_intent(
        &self,
        items: &[CartItem],
        location: Option<Coordinate>,
    ) -> Result<String, ApiError>;

    /// Status of the payment intent behind `client_secret`.
    async fn payment_status(&self, client_secret: &str) -> Result<PaymentStatus, ApiError>;
}

#[derive(Serialize)]
struct VerifyZoneRequest<'a> {
    address: &'a DeliveryAddress,
}

#[derive(Serialize)]
struct CreatePaymentIntentRequest<'a> {
    items: &'a [CartItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<Coordinate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentIntentCreated {
    client_secret: String,
}

#[derive(Deserialize)]
struct PaymentStatusResponse {
    status: PaymentStatus,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// [`StorefrontApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct StorefrontApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl StorefrontApiClient {
    /// Create a client for the server at `base_url`. A path prefix is kept
    /// whether or not it ends in `/`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(mut base_url: Url) -> Result<Self, ApiError> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map_or_else(|_| text.chars().take(200).collect(), |e| e.error);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

#[async_trait]
impl StorefrontApi for StorefrontApiClient {
    #[instrument(skip_all)]
    async fn verify_zone(&self, address: &DeliveryAddress) -> Result<DeliveryZoneResult, ApiError> {
        let response = self
            .http
            .post(self.endpoint("api/verify-delivery-zone")?)
            .json(&VerifyZoneRequest { address })
            .send()
            .await?;

        // A missing postal code is answered with 400 and a regular result body.
        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await?;
            return serde_json::from_str(&text).map_err(|_| ApiError::Status {
                status: status.as_u16(),
                message: text.chars().take(200).collect(),
            });
        }
        Self::parse(response).await
    }

    #[instrument(skip_all, fields(items = items.len()))]
    async fn create_payment_intent(
        &self,
        items: &[CartItem],
        location: Option<Coordinate>,
    ) -> Result<String, ApiError> {
        let response = self
            .http
            .post(self.endpoint("api/create-payment-intent")?)
            .json(&CreatePaymentIntentRequest { items, location })
            .send()
            .await?;
        let created: PaymentIntentCreated = Self::parse(response).await?;
        Ok(created.client_secret)
    }

    #[instrument(skip_all)]
    async fn payment_status(&self, client_secret: &str) -> Result<PaymentStatus, ApiError> {
        let response = self
            .http
            .get(self.endpoint("api/payment-intent-status")?)
            .query(&[("payment_intent_client_secret", client_secret)])
            .send()
            .await?;
        let body: PaymentStatusResponse = Self::parse(response).await?;
        Ok(body.status)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_payment_intent_request_shape() {
        let items = vec![CartItem {
            id: "a".into(),
            name: "A".to_string(),
            price: Decimal::new(10, 0),
            image: String::new(),
            qty: 2,
        }];
        let body = serde_json::to_value(CreatePaymentIntentRequest {
            items: &items,
            location: None,
        })
        .unwrap();
        assert_eq!(body["items"][0]["qty"], 2);
        assert!(body.get("location").is_none());
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = StorefrontApiClient::new(Url::parse("http://127.0.0.1:3000").unwrap()).unwrap();
        assert_eq!(
            client.endpoint("api/verify-delivery-zone").unwrap().as_str(),
            "http://127.0.0.1:3000/api/verify-delivery-zone"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_prefix() {
        for base in ["https://amor.test/shop", "https://amor.test/shop/"] {
            let client = StorefrontApiClient::new(Url::parse(base).unwrap()).unwrap();
            assert_eq!(
                client.endpoint("api/create-payment-intent").unwrap().as_str(),
                "https://amor.test/shop/api/create-payment-intent"
            );
        }
    }

    #[test]
    fn test_outside_zone_detection() {
        let err = ApiError::Status {
            status: 403,
            message: "outside".to_string(),
        };
        assert!(err.is_outside_zone());
    }
}
