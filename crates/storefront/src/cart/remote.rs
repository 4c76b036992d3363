//! Remote cart persistence.

use amor_chai_core::{ProductId, UserId};
use async_trait::async_trait;

use super::format::CartRow;
use crate::supabase::{Query, SupabaseClient, SupabaseError};

/// Remote table holding authenticated users' carts.
pub const CART_TABLE: &str = "user_cart";

/// Conflict target for cart upserts.
const CART_CONFLICT_TARGET: &str = "user_id,product_id";

/// User-keyed cart storage.
#[async_trait]
pub trait RemoteCartStore: Send + Sync {
    /// All rows for `user`, oldest first.
    async fn fetch_cart(&self, user: UserId) -> Result<Vec<CartRow>, SupabaseError>;

    /// Insert or update rows keyed by `(user_id, product_id)`.
    async fn upsert_rows(&self, rows: &[CartRow]) -> Result<(), SupabaseError>;

    /// Delete `user`'s rows whose product is not in `keep`.
    async fn delete_except(&self, user: UserId, keep: &[ProductId])
    -> Result<(), SupabaseError>;

    /// Delete every row for `user`.
    async fn delete_all(&self, user: UserId) -> Result<(), SupabaseError>;
}

/// [`RemoteCartStore`] backed by the Supabase `user_cart` table.
#[derive(Debug, Clone)]
pub struct SupabaseCartStore {
    client: SupabaseClient,
}

impl SupabaseCartStore {
    #[must_use]
    pub const fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteCartStore for SupabaseCartStore {
    async fn fetch_cart(&self, user: UserId) -> Result<Vec<CartRow>, SupabaseError> {
        let query = Query::new()
            .select("*")
            .eq("user_id", user)
            .order("created_at", true);
        self.client.select(CART_TABLE, &query).await
    }

    async fn upsert_rows(&self, rows: &[CartRow]) -> Result<(), SupabaseError> {
        self.client
            .upsert(CART_TABLE, rows, CART_CONFLICT_TARGET)
            .await
    }

    async fn delete_except(
        &self,
        user: UserId,
        keep: &[ProductId],
    ) -> Result<(), SupabaseError> {
        let query = Query::new()
            .eq("user_id", user)
            .not_in("product_id", keep);
        self.client.delete(CART_TABLE, &query).await
    }

    async fn delete_all(&self, user: UserId) -> Result<(), SupabaseError> {
        self.client
            .delete(CART_TABLE, &Query::new().eq("user_id", user))
            .await
    }
}
