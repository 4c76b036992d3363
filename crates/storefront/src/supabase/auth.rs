//! `GoTrue` authentication.
//!
//! The session is persisted in the local store under
//! `sb-<project-ref>-auth-token`, the same key the browser SDK uses, so
//! sign-out cleanup finds it by prefix.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use tracing::instrument;

use super::{SupabaseClient, SupabaseError};
use crate::cart::storage::LocalStore;
use crate::config::SupabaseConfig;
use crate::identity::{IdentityError, IdentityProvider, Session};

/// Local storage key holding the session for `config`'s project.
#[must_use]
pub fn auth_storage_key(config: &SupabaseConfig) -> String {
    format!("sb-{}-auth-token", config.project_ref())
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct PkceGrant<'a> {
    auth_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
}

impl SupabaseClient {
    async fn token_grant<B: Serialize + Sync>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Session, SupabaseError> {
        let url = self.endpoint("auth/v1/token")?;
        let response = self
            .request(Method::POST, url)
            .query(&[("grant_type", grant_type)])
            .json(body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        response
            .json()
            .await
            .map_err(|e| SupabaseError::Parse(e.to_string()))
    }

    /// Password sign-in.
    ///
    /// # Errors
    ///
    /// Returns error if the credentials are rejected or the request fails.
    #[instrument(skip_all)]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SupabaseError> {
        self.token_grant("password", &PasswordGrant { email, password })
            .await
    }

    /// Trade a refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns error if the refresh token is invalid or the request fails.
    #[instrument(skip_all)]
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, SupabaseError> {
        self.token_grant("refresh_token", &RefreshGrant { refresh_token })
            .await
    }

    /// Complete an OAuth or magic-link redirect by exchanging its code.
    ///
    /// # Errors
    ///
    /// Returns error if the code is invalid or expired.
    #[instrument(skip_all)]
    pub async fn exchange_code_for_session(
        &self,
        auth_code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, SupabaseError> {
        self.token_grant(
            "pkce",
            &PkceGrant {
                auth_code,
                code_verifier,
            },
        )
        .await
    }

    /// Revoke the session identified by the current access token.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails.
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<(), SupabaseError> {
        let url = self.endpoint("auth/v1/logout")?;
        let response = self.request(Method::POST, url).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

impl From<SupabaseError> for IdentityError {
    fn from(err: SupabaseError) -> Self {
        let rejected = matches!(err.status(), Some(400))
            && matches!(
                err.code(),
                Some("invalid_credentials" | "invalid_grant")
            );
        if rejected {
            Self::InvalidCredentials
        } else {
            Self::Provider(err.to_string())
        }
    }
}

// =============================================================================
// SupabaseAuth
// =============================================================================

/// [`IdentityProvider`] backed by Supabase `GoTrue`.
///
/// Keeps the client's bearer token in step with the persisted session.
pub struct SupabaseAuth {
    client: SupabaseClient,
    store: Arc<dyn LocalStore>,
    key: String,
}

impl std::fmt::Debug for SupabaseAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAuth")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl SupabaseAuth {
    #[must_use]
    pub fn new(client: SupabaseClient, store: Arc<dyn LocalStore>, key: String) -> Self {
        Self { client, store, key }
    }

    fn load(&self) -> Option<Session> {
        let raw = match self.store.get(&self.key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read persisted session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable persisted session");
                None
            }
        }
    }

    fn persist(&self, session: &Session) {
        let result = serde_json::to_string(session)
            .map_err(|e| e.to_string())
            .and_then(|raw| self.store.set(&self.key, &raw).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Could not persist session");
        }
        self.client.set_access_token(Some(&session.access_token));
    }

    fn forget(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            tracing::warn!(error = %e, "Could not remove persisted session");
        }
        self.client.set_access_token(None);
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        let Some(session) = self.load() else {
            self.client.set_access_token(None);
            return Ok(None);
        };

        if !session.is_expired_at(chrono::Utc::now().timestamp()) {
            self.client.set_access_token(Some(&session.access_token));
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            self.forget();
            return Ok(None);
        };

        match self.client.refresh_session(refresh_token).await {
            Ok(refreshed) => {
                self.persist(&refreshed);
                Ok(Some(refreshed))
            }
            Err(e) if e.status() == Some(400) => {
                tracing::info!("Refresh token rejected, session ended");
                self.forget();
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let result = if self.client.has_access_token() {
            self.client.logout().await
        } else {
            Ok(())
        };
        // The local session goes regardless: a revoked or expired token
        // must not linger.
        self.forget();
        result.map_err(IdentityError::from)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        let session = self.client.sign_in_with_password(email, password).await?;
        self.persist(&session);
        Ok(session)
    }
}
