//! Supabase client: `PostgREST` record store and `GoTrue` authentication.
//!
//! # Architecture
//!
//! - One `reqwest` client per project, shared by the record store and auth
//! - Requests carry the anon key as `apikey` and the user's access token
//!   (or the anon key when signed out) as the bearer token
//! - Errors keep the backend's error `code` so callers can single out
//!   expected conditions such as a table that has not been provisioned
//!
//! # Example
//!
//! ```rust,ignore
//! use amor_chai_storefront::supabase::{Query, SupabaseClient};
//!
//! let client = SupabaseClient::new(&config)?;
//! let rows: Vec<CartRow> = client
//!     .select("user_cart", &Query::new().select("*").eq("user_id", user_id))
//!     .await?;
//! ```

mod auth;
mod rest;

pub use auth::{SupabaseAuth, auth_storage_key};
pub use rest::Query;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::SupabaseConfig;

/// `PostgreSQL`: relation does not exist.
pub const MISSING_RELATION: &str = "42P01";
/// `PostgREST`: table not found in the schema cache.
pub const MISSING_TABLE: &str = "PGRST205";
/// `PostgreSQL`: unique constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors that can occur when talking to Supabase.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid project URL or path.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl SupabaseError {
    /// Backend error code, if the response carried one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status, if the request reached the server.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The table does not exist: the feature is not provisioned.
    #[must_use]
    pub fn is_missing_relation(&self) -> bool {
        matches!(self.code(), Some(MISSING_RELATION | MISSING_TABLE))
    }

    /// A unique constraint rejected the write.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION)
    }
}

/// Error body returned by `PostgREST` or `GoTrue`.
///
/// The two services use different field names, so every variant is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl ErrorBody {
    fn code(&self) -> Option<String> {
        let code = match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        code.or_else(|| self.error_code.clone())
            .or_else(|| self.error.clone())
    }

    fn message(self, fallback: String) -> String {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .unwrap_or(fallback)
    }
}

// =============================================================================
// SupabaseClient
// =============================================================================

/// Client for one Supabase project.
#[derive(Clone)]
pub struct SupabaseClient {
    inner: Arc<SupabaseClientInner>,
}

struct SupabaseClientInner {
    http: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    access_token: RwLock<Option<SecretString>>,
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl SupabaseClient {
    /// Create a client for the configured project.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &SupabaseConfig) -> Result<Self, SupabaseError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            inner: Arc::new(SupabaseClientInner {
                http,
                base_url: config.url.clone(),
                anon_key: config.anon_key.clone(),
                access_token: RwLock::new(None),
            }),
        })
    }

    /// Use `token` as the bearer token for subsequent requests, or fall back
    /// to the anon key when `None`.
    pub fn set_access_token(&self, token: Option<&str>) {
        let mut slot = self
            .inner
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = token.map(|t| SecretString::from(t.to_string()));
    }

    /// Whether a user access token is set.
    #[must_use]
    pub fn has_access_token(&self) -> bool {
        self.inner
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn bearer(&self) -> String {
        self.inner
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or_else(
                || self.inner.anon_key.expose_secret().to_string(),
                |token| token.expose_secret().to_string(),
            )
    }

    fn endpoint(&self, path: &str) -> Result<Url, SupabaseError> {
        Ok(self.inner.base_url.join(path)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.inner
            .http
            .request(method, url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(self.bearer())
    }

    /// Turn a non-success response into `SupabaseError::Api`.
    async fn check(response: Response) -> Result<Response, SupabaseError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let code = body.code();
        let message = body.message(text.chars().take(200).collect());

        tracing::debug!(
            status = status.as_u16(),
            code = code.as_deref().unwrap_or(""),
            "Supabase returned non-success status"
        );

        Err(SupabaseError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}
