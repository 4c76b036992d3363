//! Postal-code delivery check for the address step of checkout.

use amor_chai_core::delivery::{OUTSIDE_AREA_MESSAGE, ZONE_CHECK_UNAVAILABLE_MESSAGE};
use amor_chai_core::{DeliveryAddress, DeliveryZoneResult};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::instrument;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyZoneRequest {
    #[serde(default)]
    pub address: Option<DeliveryAddress>,
}

/// Check an address against the postal-code allowlist.
///
/// A missing postal code is a client error; an unreadable body is reported
/// as a failed check so the caller fails closed.
///
/// # Route
///
/// `POST /api/verify-delivery-zone`
#[instrument(skip_all)]
pub async fn verify_delivery_zone(
    State(state): State<AppState>,
    body: Result<Json<VerifyZoneRequest>, JsonRejection>,
) -> (StatusCode, Json<DeliveryZoneResult>) {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Unreadable zone check request");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DeliveryZoneResult::denied(ZONE_CHECK_UNAVAILABLE_MESSAGE)),
            );
        }
    };

    let postal_code = request
        .address
        .as_ref()
        .and_then(|address| address.postal_code.as_deref());

    match state.postal_codes().locate(postal_code) {
        Ok(allowed) => {
            tracing::info!(allowed, "Postal code checked");
            let result = if allowed {
                DeliveryZoneResult::allowed()
            } else {
                DeliveryZoneResult::denied(OUTSIDE_AREA_MESSAGE)
            };
            (StatusCode::OK, Json(result))
        }
        Err(err) => (StatusCode::BAD_REQUEST, Json(err.into())),
    }
}
