//! Configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Server (`StorefrontConfig`)
//!
//! ### Required
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//!
//! ### Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STRIPE_SECRET_KEY` - Stripe secret key (payments are unavailable without it)
//! - `STRIPE_PUBLISHABLE_KEY` - Stripe publishable key (handed to browsers)
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret (`whsec_...`)
//! - `STRIPE_API_BASE` - Stripe API base URL (default: <https://api.stripe.com>)
//! - `SUPABASE_URL` / `SUPABASE_ANON_KEY` - Supabase project (both or neither)
//! - `DELIVERY_CONTACT_URL` - Manual delivery contact link (default: Instagram)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//!
//! ## Client (`ClientConfig`)
//!
//! - `AMOR_API_URL` - Storefront API base URL (default: <http://127.0.0.1:3000>)
//! - `AMOR_DATA_DIR` - Local storage directory (default: `.amor`)
//! - `SUPABASE_URL` / `SUPABASE_ANON_KEY` - Absent means anonymous, local-only mode
//! - `AMOR_CHECKOUT_TIMEOUT_SECS` - Payment initialization deadline (default: 15)
//! - `AMOR_SIGN_OUT_TIMEOUT_SECS` - Remote sign-out deadline (default: 10)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Default manual-delivery contact channel.
pub const DEFAULT_CONTACT_URL: &str = "https://www.instagram.com/drinkamorchai/";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

// =============================================================================
// Server
// =============================================================================

/// Storefront server configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Stripe configuration; `None` disables payment routes
    pub stripe: Option<StripeConfig>,
    /// Supabase configuration; `None` disables the auth callback
    pub supabase: Option<SupabaseConfig>,
    /// Where customers outside the zone are sent to arrange delivery
    pub delivery_contact_url: String,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Fraction of errors sent to Sentry
    pub sentry_sample_rate: f32,
    /// Fraction of transactions traced
    pub sentry_traces_sample_rate: f32,
}

/// Stripe API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_...`)
    pub secret_key: SecretString,
    /// Publishable key (`pk_...`), safe to expose in browsers
    pub publishable_key: Option<String>,
    /// Webhook signing secret (`whsec_...`)
    pub webhook_secret: Option<SecretString>,
    /// API base URL
    pub api_base: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("publishable_key", &self.publishable_key)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Supabase project configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project URL (e.g. `https://abcd.supabase.co`)
    pub url: Url,
    /// Anonymous API key
    pub anon_key: SecretString,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .finish()
    }
}

impl SupabaseConfig {
    /// Project reference, the first label of the project host.
    ///
    /// Used to namespace the locally persisted session key.
    #[must_use]
    pub fn project_ref(&self) -> &str {
        self.url
            .host_str()
            .and_then(|host| host.split('.').next())
            .unwrap_or("local")
    }

    /// Load from `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    ///
    /// Returns `Ok(None)` when neither is set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if only one of the two is set or the URL is invalid.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        match (get_optional_env("SUPABASE_URL"), get_optional_env("SUPABASE_ANON_KEY")) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::MissingEnvVar("SUPABASE_ANON_KEY".to_string())),
            (None, Some(_)) => Err(ConfigError::MissingEnvVar("SUPABASE_URL".to_string())),
            (Some(url), Some(anon_key)) => Ok(Some(Self {
                url: parse_url("SUPABASE_URL", &url)?,
                anon_key: SecretString::from(anon_key),
            })),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_string(), e.to_string())
            })?;
        let port = get_env_or_default("STOREFRONT_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_PORT".to_string(), e.to_string())
            })?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;
        parse_url("STOREFRONT_BASE_URL", &base_url)?;

        let stripe = StripeConfig::from_env()?;
        let supabase = SupabaseConfig::from_env()?;

        Ok(Self {
            host,
            port,
            base_url: base_url.trim_end_matches('/').to_string(),
            stripe,
            supabase,
            delivery_contact_url: get_env_or_default("DELIVERY_CONTACT_URL", DEFAULT_CONTACT_URL),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_rate("SENTRY_SAMPLE_RATE", 1.0)?,
            sentry_traces_sample_rate: parse_rate("SENTRY_TRACES_SAMPLE_RATE", 0.1)?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl StripeConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(secret_key) = get_optional_env("STRIPE_SECRET_KEY") else {
            return Ok(None);
        };
        validate_secret_strength(&secret_key, "STRIPE_SECRET_KEY")?;

        let webhook_secret = get_optional_env("STRIPE_WEBHOOK_SECRET")
            .map(|value| {
                validate_secret_strength(&value, "STRIPE_WEBHOOK_SECRET")?;
                Ok::<_, ConfigError>(SecretString::from(value))
            })
            .transpose()?;

        Ok(Some(Self {
            secret_key: SecretString::from(secret_key),
            publishable_key: get_optional_env("STRIPE_PUBLISHABLE_KEY"),
            webhook_secret,
            api_base: get_env_or_default("STRIPE_API_BASE", "https://api.stripe.com"),
        }))
    }
}

// =============================================================================
// Client
// =============================================================================

/// Configuration for the client-side session library.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Storefront API base URL
    pub api_url: Url,
    /// Directory holding the local key-value store
    pub data_dir: PathBuf,
    /// Supabase project; `None` runs anonymous and local-only
    pub supabase: Option<SupabaseConfig>,
    /// Deadline for payment initialization
    pub checkout_timeout: Duration,
    /// Deadline for the remote sign-out call
    pub sign_out_timeout: Duration,
}

impl ClientConfig {
    /// Default checkout deadline.
    pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(15);
    /// Default sign-out deadline.
    pub const DEFAULT_SIGN_OUT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let api_url = parse_url(
            "AMOR_API_URL",
            &get_env_or_default("AMOR_API_URL", "http://127.0.0.1:3000"),
        )?;

        Ok(Self {
            api_url,
            data_dir: PathBuf::from(get_env_or_default("AMOR_DATA_DIR", ".amor")),
            supabase: SupabaseConfig::from_env()?,
            checkout_timeout: parse_secs(
                "AMOR_CHECKOUT_TIMEOUT_SECS",
                Self::DEFAULT_CHECKOUT_TIMEOUT,
            )?,
            sign_out_timeout: parse_secs(
                "AMOR_SIGN_OUT_TIMEOUT_SECS",
                Self::DEFAULT_SIGN_OUT_TIMEOUT,
            )?,
        })
    }

    /// Path of the local key-value store file.
    #[must_use]
    pub fn local_store_path(&self) -> PathBuf {
        self.data_dir.join("local-storage.json")
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    get_optional_env(key).map_or(Ok(default), |value| {
        value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

fn parse_rate(key: &str, default: f32) -> Result<f32, ConfigError> {
    let Some(value) = get_optional_env(key) else {
        return Ok(default);
    };
    let rate = value
        .parse::<f32>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be between 0.0 and 1.0".to_string(),
        ))
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key from the Stripe dashboard."
            ),
        ));
    }

    Ok(())
}
