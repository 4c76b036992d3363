//! Session lifecycle.
//!
//! [`SessionManager`] owns the current session, publishes [`AuthEvent`]s to
//! every subscriber (the cart manager, the likes cache), and runs the
//! sign-out procedure:
//!
//! 1. Duplicate calls while a sign-out is running are ignored
//! 2. The remote sign-out gets a deadline; timeouts and errors fail forward
//! 3. If the provider still reports a session, one bounded retry
//! 4. Local storage is cleared of the cart and every auth-related key
//! 5. Subscribers are told the sign-out was initiated locally
//!
//! The shared [`SignOutFlag`] is raised for the whole procedure so that
//! concurrent cart operations can tell a sign-out is under way.

mod provider;

pub use provider::{AnonymousIdentity, AuthUser, IdentityError, IdentityProvider, Session};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use amor_chai_core::UserId;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::cart::storage::{CART_KEY, LocalStore};
use crate::deadline::{Deadline, Deadlined};

/// Shown after a successful sign-out.
pub const SIGNED_OUT_MESSAGE: &str = "Signed out successfully. Please reload the page.";

/// Shown when local cleanup ran into errors.
pub const SIGNED_OUT_WITH_ERRORS_MESSAGE: &str =
    "Sign-out completed with errors, but you have been logged out locally.";

/// Shown when no identity provider is configured.
pub const SIGN_OUT_UNAVAILABLE_MESSAGE: &str = "Sign-out failed: Supabase not configured";

/// Deadline for the single retry when the session survives sign-out.
const SIGN_OUT_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before re-checking the session after the retry.
const SESSION_SETTLE_DELAY: Duration = Duration::from_millis(200);

const EVENT_CAPACITY: usize = 16;

/// Identity change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// Startup finished; carries the restored user, if any.
    InitialSession(Option<UserId>),
    /// A user signed in.
    SignedIn(UserId),
    /// The session ended. `initiated_locally` is set when this process ran
    /// the sign-out procedure.
    SignedOut { initiated_locally: bool },
}

/// Result of [`SessionManager::sign_out`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutOutcome {
    /// Another sign-out was already running; this call did nothing.
    AlreadyInProgress,
    /// No identity provider is configured.
    Unavailable,
    /// Signed out. `remote_confirmed` is false when the provider timed out,
    /// failed, or kept reporting a session.
    Completed { remote_confirmed: bool },
    /// Signed out locally, but clearing local storage failed.
    CompletedWithErrors,
}

impl SignOutOutcome {
    /// Message for the user, if the outcome warrants one.
    #[must_use]
    pub const fn message(&self) -> Option<&'static str> {
        match self {
            Self::AlreadyInProgress => None,
            Self::Unavailable => Some(SIGN_OUT_UNAVAILABLE_MESSAGE),
            Self::Completed { .. } => Some(SIGNED_OUT_MESSAGE),
            Self::CompletedWithErrors => Some(SIGNED_OUT_WITH_ERRORS_MESSAGE),
        }
    }
}

// =============================================================================
// SignOutFlag
// =============================================================================

/// Process-wide "sign-out in progress" flag, shared by the session and cart.
#[derive(Debug, Clone, Default)]
pub struct SignOutFlag(Arc<AtomicBool>);

impl SignOutFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a sign-out is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the flag. Returns a guard that lowers it on drop, or `None` if
    /// the flag was already raised.
    #[must_use]
    pub fn begin(&self) -> Option<SignOutGuard> {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SignOutGuard(self.clone()))
    }
}

/// Lowers the [`SignOutFlag`] when dropped.
#[derive(Debug)]
pub struct SignOutGuard(SignOutFlag);

impl Drop for SignOutGuard {
    fn drop(&mut self) {
        self.0.0.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// SessionManager
// =============================================================================

/// Holds the current session and broadcasts identity changes.
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn LocalStore>,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
    published: AtomicU64,
    signing_out: SignOutFlag,
    sign_out_deadline: Deadline,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("user", &self.current_user())
            .field("signing_out", &self.signing_out.is_active())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager. Call [`initialize`](Self::initialize) before use.
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn LocalStore>,
        sign_out_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            store,
            session: Mutex::new(None),
            events,
            published: AtomicU64::new(0),
            signing_out: SignOutFlag::new(),
            sign_out_deadline: Deadline::new("sign_out", sign_out_timeout),
        }
    }

    /// Subscribe to identity changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// The shared sign-out flag.
    #[must_use]
    pub fn signing_out_flag(&self) -> SignOutFlag {
        self.signing_out.clone()
    }

    /// Whether a sign-out is running.
    #[must_use]
    pub fn is_signing_out(&self) -> bool {
        self.signing_out.is_active()
    }

    /// The signed-in user, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<AuthUser> {
        self.lock_session().as_ref().map(|s| s.user.clone())
    }

    /// The signed-in user's id, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.lock_session().as_ref().map(|s| s.user.id)
    }

    /// Whether an identity provider is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of events published so far.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    fn publish(&self, event: AuthEvent) {
        self.published.fetch_add(1, Ordering::SeqCst);
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }

    /// Restore the session from the provider.
    ///
    /// Provider errors are logged and treated as signed out.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Option<UserId> {
        let session = match self.provider.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Error getting session");
                None
            }
        };

        let user = session.as_ref().map(|s| s.user.id);
        *self.lock_session() = session;
        self.publish(AuthEvent::InitialSession(user));
        user
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError` if the provider rejects the credentials or
    /// is unreachable.
    #[instrument(skip(self, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, IdentityError> {
        let session = self.provider.sign_in_with_password(email, password).await?;
        let user = session.user.clone();
        *self.lock_session() = Some(session);

        tracing::info!(user_id = %user.id, "Signed in");
        self.publish(AuthEvent::SignedIn(user.id));
        Ok(user)
    }

    /// The provider reported that the session ended (expiry, another tab).
    pub fn handle_remote_sign_out(&self) {
        if self.signing_out.is_active() {
            return;
        }
        *self.lock_session() = None;
        self.publish(AuthEvent::SignedOut {
            initiated_locally: false,
        });
    }

    /// Sign out. Safe to call concurrently; extra calls are ignored.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> SignOutOutcome {
        if !self.provider.is_configured() {
            tracing::error!("Sign-out requested without an identity provider");
            return SignOutOutcome::Unavailable;
        }

        let Some(_guard) = self.signing_out.begin() else {
            tracing::warn!("Sign-out already in progress, ignoring duplicate call");
            return SignOutOutcome::AlreadyInProgress;
        };

        let remote_confirmed = match self.sign_out_deadline.run(self.provider.sign_out()).await {
            Deadlined::Completed(Ok(())) => self.confirm_session_cleared().await,
            Deadlined::Completed(Err(e)) => {
                tracing::error!(error = %e, "Sign-out failed, continuing with local cleanup");
                false
            }
            Deadlined::TimedOut => false,
        };

        let storage_cleared = self.clear_local_storage();

        *self.lock_session() = None;
        self.publish(AuthEvent::SignedOut {
            initiated_locally: true,
        });

        if storage_cleared {
            tracing::info!(remote_confirmed, "Signed out");
            SignOutOutcome::Completed { remote_confirmed }
        } else {
            SignOutOutcome::CompletedWithErrors
        }
    }

    /// After a successful remote sign-out, make sure the provider agrees the
    /// session is gone, retrying once if it does not.
    async fn confirm_session_cleared(&self) -> bool {
        match self.provider.get_session().await {
            Ok(None) => return true,
            Ok(Some(_)) => tracing::warn!("Session still exists after sign-out, retrying"),
            Err(e) => {
                tracing::warn!(error = %e, "Could not verify sign-out");
                return false;
            }
        }

        let retry = Deadline::new("sign_out_retry", SIGN_OUT_RETRY_TIMEOUT);
        if let Deadlined::Completed(Err(e)) = retry.run(self.provider.sign_out()).await {
            tracing::error!(error = %e, "Retry sign-out failed");
        }
        tokio::time::sleep(SESSION_SETTLE_DELAY).await;

        if matches!(self.provider.get_session().await, Ok(None)) {
            true
        } else {
            tracing::error!("Session still exists after retry, proceeding with cleanup anyway");
            false
        }
    }

    /// Remove the cart and every auth-related key. Returns `false` if any
    /// storage call failed.
    fn clear_local_storage(&self) -> bool {
        let mut ok = true;

        if let Err(e) = self.store.remove(CART_KEY) {
            tracing::error!(error = %e, "Error clearing cart from local storage");
            ok = false;
        }

        match self.store.keys() {
            Ok(keys) => {
                for key in keys.into_iter().filter(|k| is_auth_key(k)) {
                    if let Err(e) = self.store.remove(&key) {
                        tracing::error!(error = %e, key = %key, "Error clearing auth key");
                        ok = false;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error listing local storage keys");
                ok = false;
            }
        }

        ok
    }
}

/// Keys written by the identity provider.
fn is_auth_key(key: &str) -> bool {
    key.starts_with("sb-") || key.contains("supabase") || key.contains("auth-token")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cart::storage::MemoryLocalStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Provider whose sign-out can hang, wait for a signal, or leave the
    /// session behind.
    #[derive(Default)]
    struct ScriptedProvider {
        session: Mutex<Option<Session>>,
        hang: AtomicBool,
        hold: AtomicBool,
        release: Notify,
        sticky: AtomicBool,
        sign_out_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn signed_in() -> Arc<Self> {
            let provider = Self::default();
            *provider.session.lock().unwrap() = Some(Session {
                access_token: "access".to_string(),
                refresh_token: None,
                expires_at: None,
                user: AuthUser {
                    id: UserId::random(),
                    email: Some("regular@example.com".to_string()),
                },
            });
            Arc::new(provider)
        }

        fn calls(&self) -> usize {
            self.sign_out_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
            Ok(self.session.lock().unwrap().clone())
        }

        async fn sign_out(&self) -> Result<(), IdentityError> {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.hold.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            if !self.sticky.load(Ordering::SeqCst) {
                *self.session.lock().unwrap() = None;
            }
            Ok(())
        }

        async fn sign_in_with_password(
            &self,
            _email: &str,
            _password: &str,
        ) -> Result<Session, IdentityError> {
            Err(IdentityError::InvalidCredentials)
        }
    }

    async fn started(
        provider: &Arc<ScriptedProvider>,
        store: &Arc<MemoryLocalStore>,
    ) -> Arc<SessionManager> {
        let manager = SessionManager::new(
            Arc::clone(provider) as Arc<dyn IdentityProvider>,
            Arc::clone(store) as Arc<dyn LocalStore>,
            Duration::from_secs(10),
        );
        assert!(manager.initialize().await.is_some());
        Arc::new(manager)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_sign_out_fails_forward_after_deadline() {
        let provider = ScriptedProvider::signed_in();
        provider.hang.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryLocalStore::new());
        store.set(CART_KEY, "[]").unwrap();
        store.set("sb-project-auth-token", "{}").unwrap();
        let manager = started(&provider, &store).await;
        let mut events = manager.subscribe();

        let started_at = tokio::time::Instant::now();
        let outcome = manager.sign_out().await;

        assert_eq!(
            outcome,
            SignOutOutcome::Completed {
                remote_confirmed: false
            }
        );
        assert!(started_at.elapsed() >= Duration::from_secs(10));
        assert_eq!(manager.user_id(), None);
        assert!(!manager.is_signing_out());
        assert_eq!(store.get(CART_KEY).unwrap(), None);
        assert_eq!(store.get("sb-project-auth-token").unwrap(), None);
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::SignedOut {
                initiated_locally: true
            }
        );
    }

    #[tokio::test]
    async fn test_second_sign_out_while_first_runs_is_ignored() {
        let provider = ScriptedProvider::signed_in();
        provider.hold.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryLocalStore::new());
        let manager = started(&provider, &store).await;

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.sign_out().await }
        });
        while provider.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(manager.is_signing_out());
        assert_eq!(manager.sign_out().await, SignOutOutcome::AlreadyInProgress);

        provider.release.notify_one();
        assert_eq!(
            first.await.unwrap(),
            SignOutOutcome::Completed {
                remote_confirmed: true
            }
        );
        assert_eq!(provider.calls(), 1);
        assert!(!manager.is_signing_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_surviving_session_gets_one_retry() {
        let provider = ScriptedProvider::signed_in();
        provider.sticky.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryLocalStore::new());
        let manager = started(&provider, &store).await;

        let outcome = manager.sign_out().await;

        assert_eq!(
            outcome,
            SignOutOutcome::Completed {
                remote_confirmed: false
            }
        );
        assert_eq!(provider.calls(), 2);
        assert_eq!(manager.user_id(), None);
    }

    #[test]
    fn test_auth_key_patterns() {
        assert!(is_auth_key("sb-abcdefgh-auth-token"));
        assert!(is_auth_key("supabase.auth.token"));
        assert!(is_auth_key("legacy-auth-token"));
        assert!(!is_auth_key(CART_KEY));
        assert!(!is_auth_key("amor_like_counts"));
    }

    #[test]
    fn test_sign_out_flag_is_exclusive() {
        let flag = SignOutFlag::new();
        let guard = flag.begin();
        assert!(guard.is_some());
        assert!(flag.is_active());
        assert!(flag.begin().is_none());

        drop(guard);
        assert!(!flag.is_active());
        assert!(flag.begin().is_some());
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            SignOutOutcome::Completed {
                remote_confirmed: false
            }
            .message(),
            Some(SIGNED_OUT_MESSAGE)
        );
        assert_eq!(SignOutOutcome::AlreadyInProgress.message(), None);
    }
}
