//! Conversions between the cart and its stored shapes.
//!
//! Neither local storage nor the remote table is trusted to hold a
//! well-formed cart: older clients wrote numeric ids, string prices, or
//! zero quantities. Everything read passes through the normalization here
//! before reaching the cart.

use std::str::FromStr;

use amor_chai_core::{Cart, CartItem, ProductId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialize a cart for local storage.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_storage_format(cart: &Cart) -> Result<String, serde_json::Error> {
    serde_json::to_string(cart)
}

/// Parse a cart from local storage, normalizing every entry.
///
/// Entries without an id are dropped.
///
/// # Errors
///
/// Returns an error if `raw` is not a JSON array of objects.
pub fn from_storage_format(raw: &str) -> Result<Cart, serde_json::Error> {
    let entries: Vec<StoredItem> = serde_json::from_str(raw)?;
    Ok(entries
        .into_iter()
        .filter_map(StoredItem::normalize)
        .collect())
}

/// A cart entry as found in local storage.
#[derive(Debug, Deserialize)]
struct StoredItem {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Value,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    qty: Value,
}

impl StoredItem {
    fn normalize(self) -> Option<CartItem> {
        let Some(id) = id_from_value(&self.id) else {
            tracing::debug!(entry = ?self, "dropping stored cart entry without id");
            return None;
        };
        Some(CartItem {
            id,
            name: self.name.unwrap_or_default(),
            price: price_from_value(&self.price),
            image: self.image.unwrap_or_default(),
            qty: qty_from_value(&self.qty),
        })
    }
}

fn id_from_value(value: &Value) -> Option<ProductId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(ProductId::new(s.as_str())),
        Value::Number(n) => Some(ProductId::new(n.to_string())),
        _ => None,
    }
}

fn price_from_value(value: &Value) -> Decimal {
    let price = match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .unwrap_or_default(),
        Value::String(s) => Decimal::from_str(s.trim()).unwrap_or_default(),
        _ => Decimal::ZERO,
    };
    clamp_price(price)
}

fn qty_from_value(value: &Value) -> u32 {
    value
        .as_i64()
        .or_else(|| value.as_u64().map(|_| i64::MAX))
        .or_else(|| {
            value.as_f64().filter(|f| f.is_finite()).map(|f| {
                #[allow(clippy::cast_possible_truncation)] // float-to-int casts saturate
                let whole = f.trunc() as i64;
                whole
            })
        })
        .map_or(1, clamp_qty)
}

fn clamp_price(price: Decimal) -> Decimal {
    price.max(Decimal::ZERO)
}

fn clamp_qty(qty: i64) -> u32 {
    u32::try_from(qty.max(1)).unwrap_or(u32::MAX)
}

// =============================================================================
// Remote rows
// =============================================================================

/// A row of the remote `user_cart` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartRow {
    pub user_id: UserId,
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub product_price: Option<Decimal>,
    #[serde(default)]
    pub product_image: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CartRow {
    /// Row for `item` owned by `user`. `created_at` is left to the database.
    #[must_use]
    pub fn from_item(user: UserId, item: &CartItem) -> Self {
        Self {
            user_id: user,
            product_id: item.id.clone(),
            product_name: Some(item.name.clone()),
            product_price: Some(item.price),
            product_image: Some(item.image.clone()),
            quantity: Some(i64::from(item.qty.max(1))),
            created_at: None,
        }
    }

    /// Normalize a row into a cart item.
    #[must_use]
    pub fn into_item(self) -> CartItem {
        CartItem {
            id: self.product_id,
            name: self.product_name.unwrap_or_default(),
            price: clamp_price(self.product_price.unwrap_or_default()),
            image: self.product_image.unwrap_or_default(),
            qty: self.quantity.map_or(1, clamp_qty),
        }
    }
}

/// Build a cart from remote rows, in the order given.
#[must_use]
pub fn cart_from_rows(rows: Vec<CartRow>) -> Cart {
    rows.into_iter().map(CartRow::into_item).collect()
}

/// Rows for every item in `cart`.
#[must_use]
pub fn rows_from_cart(user: UserId, cart: &Cart) -> Vec<CartRow> {
    cart.items()
        .iter()
        .map(|item| CartRow::from_item(user, item))
        .collect()
}
