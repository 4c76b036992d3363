//! Identity provider seam.

use amor_chai_core::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session as persisted by the provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl Session {
    /// Whether the access token has expired at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Errors from an identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No provider is configured.
    #[error("identity provider not configured")]
    NotConfigured,

    /// Email or password rejected.
    #[error("invalid login credentials")]
    InvalidCredentials,

    /// The provider failed or is unreachable.
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// Authentication backend.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The current session, refreshing it if needed.
    async fn get_session(&self) -> Result<Option<Session>, IdentityError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Start a session with email and password.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError>;

    /// Whether this provider can actually authenticate.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Provider used when no identity backend is configured: always signed out.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentity;

#[async_trait]
impl IdentityProvider for AnonymousIdentity {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(None)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        Err(IdentityError::NotConfigured)
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Session, IdentityError> {
        Err(IdentityError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session(expires_at: Option<i64>) -> Session {
        Session {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_at,
            user: AuthUser {
                id: UserId::random(),
                email: Some("a@example.com".to_string()),
            },
        }
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let debug = format!("{:?}", session(None));
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("a@example.com"));
    }

    #[test]
    fn test_session_expiry() {
        assert!(!session(None).is_expired_at(100));
        assert!(!session(Some(200)).is_expired_at(100));
        assert!(session(Some(100)).is_expired_at(100));
    }

    #[tokio::test]
    async fn test_anonymous_identity() {
        let provider = AnonymousIdentity;
        assert!(!provider.is_configured());
        assert!(provider.get_session().await.unwrap().is_none());
        assert!(matches!(
            provider.sign_in_with_password("a", "b").await,
            Err(IdentityError::NotConfigured)
        ));
    }
}
