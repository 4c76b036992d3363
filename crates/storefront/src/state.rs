//! Application state shared across handlers.

use std::sync::Arc;

use amor_chai_core::{DeliveryZone, PostalCodeAllowlist};

use crate::config::StorefrontConfig;
use crate::stripe::{StripeClient, StripeError};
use crate::supabase::{SupabaseClient, SupabaseError};

/// Error building application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Stripe client: {0}")]
    Stripe(#[from] StripeError),
    #[error("Supabase client: {0}")]
    Supabase(#[from] SupabaseError),
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. Stripe and Supabase are optional; routes
/// that need a missing integration answer with a configuration error
/// instead of the server refusing to start.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    stripe: Option<StripeClient>,
    supabase: Option<SupabaseClient>,
    zone: DeliveryZone,
    postal_codes: PostalCodeAllowlist,
}

impl AppState {
    /// Create application state with the Cape Girardeau delivery area.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: StorefrontConfig) -> Result<Self, StateError> {
        Self::with_delivery_area(
            config,
            DeliveryZone::default(),
            PostalCodeAllowlist::default(),
        )
    }

    /// Create application state with an explicit delivery area.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn with_delivery_area(
        config: StorefrontConfig,
        zone: DeliveryZone,
        postal_codes: PostalCodeAllowlist,
    ) -> Result<Self, StateError> {
        let stripe = config.stripe.as_ref().map(StripeClient::new).transpose()?;
        let supabase = config
            .supabase
            .as_ref()
            .map(SupabaseClient::new)
            .transpose()?;

        if stripe.is_none() {
            tracing::warn!("STRIPE_SECRET_KEY not set, payment routes will fail");
        }

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                stripe,
                supabase,
                zone,
                postal_codes,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// The Stripe client, if a secret key is configured.
    #[must_use]
    pub fn stripe(&self) -> Option<&StripeClient> {
        self.inner.stripe.as_ref()
    }

    /// The Supabase client, if the project is configured.
    #[must_use]
    pub fn supabase(&self) -> Option<&SupabaseClient> {
        self.inner.supabase.as_ref()
    }

    /// Coordinate gate.
    #[must_use]
    pub fn zone(&self) -> &DeliveryZone {
        &self.inner.zone
    }

    /// Postal-code gate.
    #[must_use]
    pub fn postal_codes(&self) -> &PostalCodeAllowlist {
        &self.inner.postal_codes
    }
}
