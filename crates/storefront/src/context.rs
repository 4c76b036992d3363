//! Per-session client context.
//!
//! [`ClientContext`] owns everything one shopping session needs: the local
//! store, the session manager, the cart, the likes cache, and the API
//! client. Create one with [`ClientContext::new`] (or
//! [`ClientContext::from_config`]), call [`start`](ClientContext::start),
//! and call [`shutdown`](ClientContext::shutdown) when done.
//!
//! Identity changes reach the cart through a listener task subscribed to
//! the session's event stream. Calls made through the context wait for the
//! listener to catch up, so the cart is consistent when they return.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use amor_chai_core::UserId;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::cart::CartManager;
use crate::cart::remote::{RemoteCartStore, SupabaseCartStore};
use crate::cart::storage::{FileLocalStore, LocalStore};
use crate::checkout::CheckoutFlow;
use crate::checkout::api::{ApiError, StorefrontApi, StorefrontApiClient};
use crate::config::{ClientConfig, DEFAULT_CONTACT_URL};
use crate::identity::{
    AnonymousIdentity, AuthEvent, AuthUser, IdentityError, IdentityProvider, SessionManager,
    SignOutOutcome,
};
use crate::likes::{LikeStore, ProductLikes, SupabaseLikeStore};
use crate::supabase::{SupabaseAuth, SupabaseClient, SupabaseError, auth_storage_key};

/// Errors building a context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Supabase client error: {0}")]
    Supabase(#[from] SupabaseError),

    #[error("storefront API client error: {0}")]
    Api(#[from] ApiError),
}

/// Collaborators for a [`ClientContext`].
pub struct ClientParts {
    pub store: Arc<dyn LocalStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub remote_cart: Option<Arc<dyn RemoteCartStore>>,
    pub likes: Option<Arc<dyn LikeStore>>,
    pub api: Arc<dyn StorefrontApi>,
    pub contact_url: String,
    pub checkout_timeout: Duration,
    pub sign_out_timeout: Duration,
}

struct Listener {
    task: JoinHandle<()>,
    processed: watch::Receiver<u64>,
}

/// One shopping session.
pub struct ClientContext {
    session: Arc<SessionManager>,
    cart: CartManager,
    likes: ProductLikes,
    api: Arc<dyn StorefrontApi>,
    contact_url: String,
    checkout_timeout: Duration,
    listener: Mutex<Option<Listener>>,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("session", &self.session)
            .field("cart", &self.cart)
            .finish_non_exhaustive()
    }
}

impl ClientContext {
    #[must_use]
    pub fn new(parts: ClientParts) -> Self {
        let session = Arc::new(SessionManager::new(
            parts.identity,
            Arc::clone(&parts.store),
            parts.sign_out_timeout,
        ));
        let cart = CartManager::new(
            Arc::clone(&parts.store),
            parts.remote_cart,
            session.signing_out_flag(),
        );
        let likes = ProductLikes::new(parts.store, parts.likes);

        Self {
            session,
            cart,
            likes,
            api: parts.api,
            contact_url: parts.contact_url,
            checkout_timeout: parts.checkout_timeout,
            listener: Mutex::new(None),
        }
    }

    /// Wire a context from configuration: a file-backed local store, and
    /// Supabase for identity and remote storage when configured.
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ContextError> {
        let store: Arc<dyn LocalStore> = Arc::new(FileLocalStore::new(config.local_store_path()));
        let api = Arc::new(StorefrontApiClient::new(config.api_url.clone())?);

        let (identity, remote_cart, likes): (
            Arc<dyn IdentityProvider>,
            Option<Arc<dyn RemoteCartStore>>,
            Option<Arc<dyn LikeStore>>,
        ) = match &config.supabase {
            Some(supabase) => {
                let client = SupabaseClient::new(supabase)?;
                let identity: Arc<dyn IdentityProvider> = Arc::new(SupabaseAuth::new(
                    client.clone(),
                    Arc::clone(&store),
                    auth_storage_key(supabase),
                ));
                let remote_cart: Arc<dyn RemoteCartStore> =
                    Arc::new(SupabaseCartStore::new(client.clone()));
                let likes: Arc<dyn LikeStore> = Arc::new(SupabaseLikeStore::new(client));
                (identity, Some(remote_cart), Some(likes))
            }
            None => {
                tracing::info!("Supabase not configured, running in local-only mode");
                let identity: Arc<dyn IdentityProvider> = Arc::new(AnonymousIdentity);
                (identity, None, None)
            }
        };

        Ok(Self::new(ClientParts {
            store,
            identity,
            remote_cart,
            likes,
            api,
            contact_url: DEFAULT_CONTACT_URL.to_string(),
            checkout_timeout: config.checkout_timeout,
            sign_out_timeout: config.sign_out_timeout,
        }))
    }

    fn listener(&self) -> MutexGuard<'_, Option<Listener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore the session, load the matching cart, and start following
    /// identity changes. Returns the signed-in user, if any.
    pub async fn start(&self) -> Option<UserId> {
        let user = self.session.initialize().await;
        self.cart.initialize(user).await;

        let events = self.session.subscribe();
        let baseline = self.session.events_published();
        let (processed_tx, processed_rx) = watch::channel(baseline);
        let task = tokio::spawn(follow_identity(self.cart.clone(), events, processed_tx));

        if let Some(previous) = self.listener().replace(Listener {
            task,
            processed: processed_rx,
        }) {
            previous.task.abort();
        }

        tracing::info!(user_id = ?user, items = self.cart.item_count(), "Client context started");
        user
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    #[must_use]
    pub const fn cart(&self) -> &CartManager {
        &self.cart
    }

    #[must_use]
    pub const fn likes(&self) -> &ProductLikes {
        &self.likes
    }

    /// A fresh checkout attempt for the current cart.
    #[must_use]
    pub fn checkout(&self) -> CheckoutFlow {
        CheckoutFlow::new(
            Arc::clone(&self.api),
            self.cart.clone(),
            self.contact_url.clone(),
            self.checkout_timeout,
        )
    }

    /// Sign in and wait for the cart to switch to the user's cart.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError` if sign-in fails.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, IdentityError> {
        let user = self.session.sign_in_with_password(email, password).await?;
        self.settle_events().await;
        Ok(user)
    }

    /// Sign out and wait for the cart to reset.
    pub async fn sign_out(&self) -> SignOutOutcome {
        let outcome = self.session.sign_out().await;
        self.settle_events().await;
        outcome
    }

    /// Wait until the listener has handled every published identity event.
    pub async fn settle_events(&self) {
        let Some(mut processed) = self.listener().as_ref().map(|l| l.processed.clone()) else {
            return;
        };
        let target = self.session.events_published();
        if processed.wait_for(|count| *count >= target).await.is_err() {
            tracing::warn!("Identity listener stopped before catching up");
        }
    }

    /// Stop following identity changes and wait for pending cart writes.
    pub async fn shutdown(&self) {
        self.settle_events().await;
        if let Some(listener) = self.listener().take() {
            listener.task.abort();
        }
        self.cart.settle().await;
        tracing::info!("Client context stopped");
    }
}

/// Apply identity events to the cart, in order.
async fn follow_identity(
    cart: CartManager,
    mut events: broadcast::Receiver<AuthEvent>,
    processed: watch::Sender<u64>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                tracing::debug!(?event, "Identity changed");
                cart.handle_auth_event(event).await;
                processed.send_modify(|count| *count += 1);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Identity listener lagged");
                processed.send_modify(|count| *count += missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
