//! Product like counts and the current user's liked set.
//!
//! Counts and the liked set are cached in local storage so the catalog can
//! show them before the remote read completes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use amor_chai_core::{ProductId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::cart::storage::{LIKE_COUNTS_KEY, LocalStore, USER_LIKES_KEY};
use crate::supabase::{Query, SupabaseClient, SupabaseError};

/// Remote table of likes, unique per `(user_id, product_id)`.
pub const LIKES_TABLE: &str = "product_likes";

/// A row of `product_likes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeRow {
    pub user_id: UserId,
    pub product_id: ProductId,
}

#[derive(Debug, Deserialize)]
struct ProductOnly {
    product_id: ProductId,
}

/// Errors from toggling a like.
#[derive(Debug, Error)]
pub enum LikeError {
    /// Likes require a signed-in user.
    #[error("sign in to like products")]
    SignInRequired,

    /// No remote store configured.
    #[error("likes are not available")]
    NotConfigured,

    #[error(transparent)]
    Remote(#[from] SupabaseError),
}

/// Remote storage for likes.
#[async_trait]
pub trait LikeStore: Send + Sync {
    /// Product ids of every like on any of `products`.
    async fn liked_products(&self, products: &[ProductId])
    -> Result<Vec<ProductId>, SupabaseError>;

    /// Products `user` has liked.
    async fn user_likes(&self, user: UserId) -> Result<Vec<ProductId>, SupabaseError>;

    async fn insert_like(&self, row: &LikeRow) -> Result<(), SupabaseError>;

    async fn delete_like(&self, row: &LikeRow) -> Result<(), SupabaseError>;
}

/// [`LikeStore`] backed by the Supabase `product_likes` table.
#[derive(Debug, Clone)]
pub struct SupabaseLikeStore {
    client: SupabaseClient,
}

impl SupabaseLikeStore {
    #[must_use]
    pub const fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LikeStore for SupabaseLikeStore {
    async fn liked_products(
        &self,
        products: &[ProductId],
    ) -> Result<Vec<ProductId>, SupabaseError> {
        let query = Query::new()
            .select("product_id")
            .in_list("product_id", products);
        let rows: Vec<ProductOnly> = self.client.select(LIKES_TABLE, &query).await?;
        Ok(rows.into_iter().map(|r| r.product_id).collect())
    }

    async fn user_likes(&self, user: UserId) -> Result<Vec<ProductId>, SupabaseError> {
        let query = Query::new().select("product_id").eq("user_id", user);
        let rows: Vec<ProductOnly> = self.client.select(LIKES_TABLE, &query).await?;
        Ok(rows.into_iter().map(|r| r.product_id).collect())
    }

    async fn insert_like(&self, row: &LikeRow) -> Result<(), SupabaseError> {
        self.client
            .insert(LIKES_TABLE, std::slice::from_ref(row))
            .await
    }

    async fn delete_like(&self, row: &LikeRow) -> Result<(), SupabaseError> {
        let query = Query::new()
            .eq("user_id", row.user_id)
            .eq("product_id", &row.product_id);
        self.client.delete(LIKES_TABLE, &query).await
    }
}

/// Like counts per product and the products the current user liked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikesSnapshot {
    pub counts: BTreeMap<ProductId, u64>,
    pub liked: BTreeSet<ProductId>,
}

impl LikesSnapshot {
    #[must_use]
    pub fn count(&self, product: &ProductId) -> u64 {
        self.counts.get(product).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_liked(&self, product: &ProductId) -> bool {
        self.liked.contains(product)
    }
}

/// Cache of likes for the catalog.
pub struct ProductLikes {
    store: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn LikeStore>>,
    snapshot: Mutex<LikesSnapshot>,
}

impl std::fmt::Debug for ProductLikes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductLikes")
            .field("snapshot", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl ProductLikes {
    /// Create a cache seeded from local storage.
    #[must_use]
    pub fn new(store: Arc<dyn LocalStore>, remote: Option<Arc<dyn LikeStore>>) -> Self {
        let snapshot = load_cached(store.as_ref());
        Self {
            store,
            remote,
            snapshot: Mutex::new(snapshot),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LikesSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> LikesSnapshot {
        self.lock().clone()
    }

    /// Reload counts for `products` and the liked set for `user`.
    ///
    /// Every product in `products` gets a count, starting at zero; likes on
    /// other products are ignored. Read errors leave zero counts or an empty
    /// liked set.
    #[instrument(skip(self, products), fields(user_id = ?user, products = products.len()))]
    pub async fn refresh(&self, user: Option<UserId>, products: &[ProductId]) -> LikesSnapshot {
        let mut counts: BTreeMap<ProductId, u64> =
            products.iter().map(|id| (id.clone(), 0)).collect();
        let mut liked = BTreeSet::new();

        if let Some(remote) = &self.remote {
            match remote.liked_products(products).await {
                Ok(likes) => {
                    for product in likes {
                        if let Some(count) = counts.get_mut(&product) {
                            *count += 1;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Error loading like counts"),
            }

            if let Some(user) = user {
                match remote.user_likes(user).await {
                    Ok(products) => liked.extend(products),
                    Err(e) => tracing::warn!(error = %e, "Error loading user likes"),
                }
            }
        }

        let snapshot = LikesSnapshot { counts, liked };
        self.persist(&snapshot);
        *self.lock() = snapshot.clone();
        snapshot
    }

    /// Like or unlike `product` for `user`, then refresh. Returns whether
    /// the product is now liked.
    ///
    /// # Errors
    ///
    /// Returns `LikeError::SignInRequired` for anonymous users, or the
    /// remote error if the write fails.
    #[instrument(skip(self, products), fields(product_id = %product))]
    pub async fn toggle(
        &self,
        user: Option<UserId>,
        product: &ProductId,
        products: &[ProductId],
    ) -> Result<bool, LikeError> {
        let user = user.ok_or(LikeError::SignInRequired)?;
        let remote = self.remote.as_ref().ok_or(LikeError::NotConfigured)?;

        let row = LikeRow {
            user_id: user,
            product_id: product.clone(),
        };
        let was_liked = self.lock().is_liked(product);

        if was_liked {
            remote.delete_like(&row).await?;
        } else {
            match remote.insert_like(&row).await {
                Ok(()) => {}
                Err(e) if e.is_unique_violation() => {
                    tracing::debug!("Product already liked");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let snapshot = self.refresh(Some(user), products).await;
        Ok(snapshot.is_liked(product))
    }

    fn persist(&self, snapshot: &LikesSnapshot) {
        let counts: BTreeMap<&str, u64> = snapshot
            .counts
            .iter()
            .map(|(id, count)| (id.as_str(), *count))
            .collect();
        let liked: Vec<&str> = snapshot.liked.iter().map(ProductId::as_str).collect();

        for (key, value) in [
            (LIKE_COUNTS_KEY, serde_json::to_string(&counts)),
            (USER_LIKES_KEY, serde_json::to_string(&liked)),
        ] {
            let result = value
                .map_err(|e| e.to_string())
                .and_then(|raw| self.store.set(key, &raw).map_err(|e| e.to_string()));
            if let Err(e) = result {
                tracing::warn!(error = %e, key, "Error caching likes");
            }
        }
    }
}

fn load_cached(store: &dyn LocalStore) -> LikesSnapshot {
    let read = |key: &str| store.get(key).ok().flatten();

    let counts = read(LIKE_COUNTS_KEY)
        .and_then(|raw| serde_json::from_str::<BTreeMap<ProductId, u64>>(&raw).ok())
        .unwrap_or_default();
    let liked = read(USER_LIKES_KEY)
        .and_then(|raw| serde_json::from_str::<BTreeSet<ProductId>>(&raw).ok())
        .unwrap_or_default();

    LikesSnapshot { counts, liked }
}
