//! Cart synchronization manager.
//!
//! # Architecture
//!
//! The cart lives in memory and is mirrored twice:
//!
//! - **Local storage** (`amor_cart`), written synchronously before every
//!   mutating call returns. Failures are logged and the cart carries on in
//!   memory.
//! - **Remote store** (`user_cart`), written on a spawned task whenever a
//!   user is signed in. At most one write is in flight; a write requested
//!   while another is outstanding is skipped, and the next mutation carries
//!   the state forward. Writes read the cart when they execute, not when
//!   they were requested. `clear()` is the exception: its write waits for
//!   the one in flight, since no later mutation may come to repair a
//!   skipped wipe.
//!
//! On sign-in the remote cart is authoritative and replaces the local one
//! outright. On sign-out the in-memory cart is emptied and the remote copy
//! is left alone so the user finds it again on the next sign-in.

pub mod format;
pub mod remote;
pub mod storage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use amor_chai_core::{Cart, CartItem, Product, ProductId, UserId};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::instrument;

use self::format::{cart_from_rows, from_storage_format, rows_from_cart, to_storage_format};
use self::remote::RemoteCartStore;
use self::storage::{CART_KEY, LocalStore};
use crate::identity::{AuthEvent, SignOutFlag};
use crate::supabase::SupabaseError;

/// What a background remote write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Remote now matches the cart as read when the write started.
    Synced,
    /// The write did not run.
    Skipped(SkipReason),
    /// The remote table does not exist.
    NotProvisioned,
    /// The remote store returned an error (logged).
    Failed,
}

/// Why a remote write was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No remote store configured.
    NoRemote,
    /// Nobody is signed in.
    Anonymous,
    /// Another write is in flight.
    InFlight,
    /// A sign-out is running.
    SigningOut,
    /// The remote cart is being loaded.
    Loading,
}

#[derive(Debug, Default)]
struct CartState {
    cart: Cart,
    owner: Option<UserId>,
    loading: bool,
    open: bool,
}

/// Owns the cart for one session context.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CartManager {
    inner: Arc<CartManagerInner>,
}

struct CartManagerInner {
    state: Mutex<CartState>,
    store: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteCartStore>>,
    syncing: AtomicBool,
    /// Held for the duration of every remote write.
    write_lock: tokio::sync::Mutex<()>,
    signing_out: SignOutFlag,
    pending: Mutex<Vec<JoinHandle<SyncOutcome>>>,
}

impl std::fmt::Debug for CartManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("CartManager")
            .field("items", &state.cart.len())
            .field("owner", &state.owner)
            .field("loading", &state.loading)
            .field("remote", &self.inner.remote.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    /// Give up if another write is in flight.
    SkipIfInFlight,
    /// Wait for the write in flight, then run.
    AfterInFlight,
}

/// Clears the in-flight flag when the write finishes.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CartManager {
    /// Create a manager holding whatever cart local storage has.
    #[must_use]
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteCartStore>>,
        signing_out: SignOutFlag,
    ) -> Self {
        let manager = Self {
            inner: Arc::new(CartManagerInner {
                state: Mutex::new(CartState::default()),
                store,
                remote,
                syncing: AtomicBool::new(false),
                write_lock: tokio::sync::Mutex::new(()),
                signing_out,
                pending: Mutex::new(Vec::new()),
            }),
        };
        let local = manager.load_local();
        manager.state().cart = local;
        manager
    }

    fn state(&self) -> MutexGuard<'_, CartState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<JoinHandle<SyncOutcome>>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Snapshot of the cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.state().cart.clone()
    }

    /// Snapshot of the line items, in insertion order.
    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.state().cart.items().to_vec()
    }

    /// Sum of `price * qty`.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.state().cart.total()
    }

    /// Total quantity across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.state().cart.item_count()
    }

    /// The signed-in user whose cart this is.
    #[must_use]
    pub fn owner(&self) -> Option<UserId> {
        self.state().owner
    }

    /// Whether the remote cart is being loaded.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn open(&self) {
        self.state().open = true;
    }

    pub fn close(&self) {
        self.state().open = false;
    }

    pub fn toggle(&self) {
        let mut state = self.state();
        state.open = !state.open;
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Add one of `product` and open the cart.
    pub fn add_item(&self, product: Product) {
        tracing::debug!(product_id = %product.id, "Adding to cart");
        self.mutate(|state| {
            state.cart.add_item(product);
            state.open = true;
        });
    }

    /// Take one of `id` out of the cart. Returns `false` if it was absent.
    pub fn remove_item(&self, id: &ProductId) -> bool {
        self.mutate(|state| state.cart.remove_item(id))
    }

    /// Set the quantity of `id` (at least 1). Returns `false` if absent.
    pub fn update_qty(&self, id: &ProductId, qty: u32) -> bool {
        self.mutate(|state| state.cart.update_qty(id, qty))
    }

    /// Empty the cart locally and remotely.
    ///
    /// Does nothing while a sign-out is running: the remote cart must
    /// survive sign-out.
    pub fn clear(&self) {
        if self.inner.signing_out.is_active() {
            tracing::info!("Sign-out in progress, skipping cart clear");
            return;
        }

        let owner = {
            let mut state = self.state();
            state.cart.clear();
            state.owner
        };

        if let Err(e) = self.inner.store.remove(CART_KEY) {
            tracing::warn!(error = %e, "Error clearing cart from local storage");
        }
        if owner.is_some() {
            self.spawn_write(WriteMode::AfterInFlight);
        }
    }

    /// Apply `f`, mirror locally, then schedule a remote write.
    fn mutate<R>(&self, f: impl FnOnce(&mut CartState) -> R) -> R {
        let (result, snapshot, owner) = {
            let mut state = self.state();
            let result = f(&mut state);
            (result, state.cart.clone(), state.owner)
        };

        self.persist_local(&snapshot);
        if owner.is_some() {
            self.schedule_sync();
        }
        result
    }

    // -------------------------------------------------------------------------
    // Local mirror
    // -------------------------------------------------------------------------

    fn load_local(&self) -> Cart {
        let raw = match self.inner.store.get(CART_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Cart::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Local storage unavailable, starting with an empty cart");
                return Cart::new();
            }
        };

        from_storage_format(&raw).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Error parsing stored cart");
            Cart::new()
        })
    }

    fn persist_local(&self, cart: &Cart) {
        let result = to_storage_format(cart)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                self.inner
                    .store
                    .set(CART_KEY, &raw)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            tracing::warn!(error = %e, "Error saving cart to local storage");
        }
    }

    // -------------------------------------------------------------------------
    // Remote mirror
    // -------------------------------------------------------------------------

    fn schedule_sync(&self) {
        self.spawn_write(WriteMode::SkipIfInFlight);
    }

    fn spawn_write(&self, mode: WriteMode) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, skipping remote cart write");
            return;
        };

        let manager = self.clone();
        let task = runtime.spawn(async move { manager.sync_remote(mode).await });

        let mut pending = self.pending();
        pending.retain(|handle| !handle.is_finished());
        pending.push(task);
    }

    /// Write the current cart to the remote store.
    #[instrument(skip(self))]
    async fn sync_remote(&self, mode: WriteMode) -> SyncOutcome {
        let Some(remote) = self.inner.remote.clone() else {
            return SyncOutcome::Skipped(SkipReason::NoRemote);
        };
        if self.inner.signing_out.is_active() {
            tracing::debug!("Sign-out in progress, skipping remote cart write");
            return SyncOutcome::Skipped(SkipReason::SigningOut);
        }
        let _in_flight = match mode {
            WriteMode::AfterInFlight => None,
            WriteMode::SkipIfInFlight => {
                if self
                    .inner
                    .syncing
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    tracing::debug!("Remote cart write already in flight, skipping");
                    return SyncOutcome::Skipped(SkipReason::InFlight);
                }
                Some(InFlight(&self.inner.syncing))
            }
        };
        let _write = self.inner.write_lock.lock().await;
        if self.inner.signing_out.is_active() {
            return SyncOutcome::Skipped(SkipReason::SigningOut);
        }

        let (owner, cart) = {
            let state = self.state();
            if state.loading {
                return SyncOutcome::Skipped(SkipReason::Loading);
            }
            let Some(owner) = state.owner else {
                return SyncOutcome::Skipped(SkipReason::Anonymous);
            };
            (owner, state.cart.clone())
        };

        write_remote(remote.as_ref(), owner, &cart).await
    }

    /// Wait for every scheduled remote write to finish.
    pub async fn settle(&self) -> Vec<SyncOutcome> {
        let handles = std::mem::take(&mut *self.pending());
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::warn!(error = %e, "Remote cart write task failed"),
            }
        }
        outcomes
    }

    // -------------------------------------------------------------------------
    // Ownership
    // -------------------------------------------------------------------------

    /// Load the cart for `owner`: the remote cart if someone is signed in,
    /// otherwise local storage.
    #[instrument(skip(self), fields(user_id = ?owner))]
    pub async fn initialize(&self, owner: Option<UserId>) {
        match owner {
            Some(user) => self.adopt_remote(user).await,
            None => {
                let local = self.load_local();
                let mut state = self.state();
                state.owner = None;
                state.cart = local;
            }
        }
    }

    /// React to an identity change.
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::InitialSession(owner) => self.initialize(owner).await,
            AuthEvent::SignedIn(user) => {
                if self.owner() == Some(user) {
                    return;
                }
                self.adopt_remote(user).await;
            }
            AuthEvent::SignedOut { initiated_locally } => {
                {
                    let mut state = self.state();
                    state.cart.clear();
                    state.owner = None;
                }
                if initiated_locally || self.inner.signing_out.is_active() {
                    return;
                }
                let local = self.load_local();
                self.state().cart = local;
            }
        }
    }

    /// Make `user` the owner and replace the cart with theirs from the
    /// remote store. A read failure keeps the current cart.
    #[instrument(skip(self), fields(user_id = %user))]
    async fn adopt_remote(&self, user: UserId) {
        {
            let mut state = self.state();
            state.owner = Some(user);
            state.loading = true;
        }

        let fetched = match &self.inner.remote {
            Some(remote) => Some(remote.fetch_cart(user).await),
            None => None,
        };

        let replaced = {
            let mut state = self.state();
            state.loading = false;
            if state.owner != Some(user) {
                tracing::debug!("Owner changed while loading, discarding remote cart");
                return;
            }
            match fetched {
                Some(Ok(rows)) => {
                    let remote_cart = cart_from_rows(rows);
                    if remote_cart == state.cart {
                        None
                    } else {
                        state.cart = remote_cart.clone();
                        Some(remote_cart)
                    }
                }
                Some(Err(e)) => {
                    log_read_error(&e);
                    None
                }
                None => None,
            }
        };

        if let Some(cart) = replaced {
            tracing::info!(items = cart.len(), "Replaced cart with remote cart");
            self.persist_local(&cart);
        }
    }

    /// Re-read the remote cart and adopt it if it differs. Returns `true`
    /// if the cart changed.
    #[instrument(skip(self))]
    pub async fn refresh_from_remote(&self) -> bool {
        let (Some(remote), Some(user)) = (self.inner.remote.clone(), self.owner()) else {
            return false;
        };

        let rows = match remote.fetch_cart(user).await {
            Ok(rows) => rows,
            Err(e) => {
                log_read_error(&e);
                return false;
            }
        };
        let remote_cart = cart_from_rows(rows);

        {
            let mut state = self.state();
            if state.owner != Some(user) || state.cart == remote_cart {
                return false;
            }
            state.cart = remote_cart.clone();
        }
        self.persist_local(&remote_cart);
        true
    }
}

async fn write_remote(remote: &dyn RemoteCartStore, owner: UserId, cart: &Cart) -> SyncOutcome {
    if cart.is_empty() {
        return match remote.delete_all(owner).await {
            Ok(()) => SyncOutcome::Synced,
            Err(e) => write_failed(&e),
        };
    }

    let mut failed = false;
    if let Err(e) = remote.upsert_rows(&rows_from_cart(owner, cart)).await {
        if e.is_missing_relation() {
            return write_failed(&e);
        }
        tracing::error!(error = %e, "Error upserting cart rows");
        failed = true;
    }

    let keep: Vec<ProductId> = cart.product_ids().cloned().collect();
    match remote.delete_except(owner, &keep).await {
        Ok(()) if failed => SyncOutcome::Failed,
        Ok(()) => SyncOutcome::Synced,
        Err(e) => write_failed(&e),
    }
}

fn write_failed(err: &SupabaseError) -> SyncOutcome {
    if err.is_missing_relation() {
        tracing::debug!("Cart table not provisioned, keeping cart local");
        SyncOutcome::NotProvisioned
    } else {
        tracing::error!(error = %err, "Error syncing cart to remote");
        SyncOutcome::Failed
    }
}

fn log_read_error(err: &SupabaseError) {
    if err.is_missing_relation() {
        tracing::debug!("Cart table not provisioned, keeping local cart");
    } else {
        tracing::error!(error = %err, "Error loading remote cart, keeping current cart");
    }
}
