//! The shopping cart value type.
//!
//! A [`Cart`] is an insertion-ordered list of [`CartItem`]s keyed by product
//! id. Every mutation preserves two invariants:
//!
//! - no two entries share the same `id`
//! - every entry has `qty >= 1`
//!
//! The cart knows nothing about where it is stored; persistence and remote
//! reconciliation live in the storefront crate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::ProductId;

/// A product as offered on the menu, before it is placed in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Unit price in USD.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Image URI.
    pub image: String,
}

impl Product {
    /// Create a product.
    #[must_use]
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Decimal,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            image: image.into(),
        }
    }
}

/// A line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: ProductId,
    pub name: String,
    /// Unit price in USD.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub image: String,
    pub qty: u32,
}

impl CartItem {
    /// Line total (`price * qty`), saturating at [`Decimal::MAX`].
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.checked_line_total().unwrap_or(Decimal::MAX)
    }

    /// Line total, or `None` if it overflows.
    #[must_use]
    pub fn checked_line_total(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.qty))
    }

    fn from_product(product: Product, qty: u32) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price: product.price,
            image: product.image,
            qty,
        }
    }
}

/// An ordered cart with unique product ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// Create an empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Build a cart from arbitrary lines, restoring the cart invariants.
    ///
    /// Lines sharing an id are collapsed into the first occurrence with their
    /// quantities summed; quantities below 1 are raised to 1.
    #[must_use]
    pub fn from_lines(lines: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::new();
        for mut line in lines {
            line.qty = line.qty.max(1);
            match cart.items.iter_mut().find(|item| item.id == line.id) {
                Some(existing) => existing.qty = existing.qty.saturating_add(line.qty),
                None => cart.items.push(line),
            }
        }
        cart
    }

    /// Add one unit of a product.
    ///
    /// Increments the quantity if the product is already present, otherwise
    /// appends it with `qty = 1`.
    pub fn add_item(&mut self, product: Product) {
        match self.items.iter_mut().find(|item| item.id == product.id) {
            Some(existing) => existing.qty = existing.qty.saturating_add(1),
            None => self.items.push(CartItem::from_product(product, 1)),
        }
    }

    /// Remove one unit of a product.
    ///
    /// Decrements the quantity when it is above 1, removes the line when it
    /// is exactly 1. Returns `false` if the product was not in the cart.
    pub fn remove_item(&mut self, id: &ProductId) -> bool {
        let Some(index) = self.items.iter().position(|item| &item.id == id) else {
            return false;
        };
        match self.items.get_mut(index) {
            Some(item) if item.qty > 1 => item.qty -= 1,
            _ => {
                self.items.remove(index);
            }
        }
        true
    }

    /// Set the quantity of a line, clamped to at least 1.
    ///
    /// Returns `false` (and changes nothing) if the product is not present.
    pub fn update_qty(&mut self, id: &ProductId, qty: u32) -> bool {
        self.items
            .iter_mut()
            .find(|item| &item.id == id)
            .map(|item| item.qty = qty.max(1))
            .is_some()
    }

    /// Remove every line.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Sum of `price * qty` over all lines, saturating at [`Decimal::MAX`].
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.checked_total().unwrap_or(Decimal::MAX)
    }

    /// Sum of `price * qty` over all lines, or `None` if it overflows.
    ///
    /// Remote rows carry whatever price was stored, so this must not panic.
    #[must_use]
    pub fn checked_total(&self) -> Option<Decimal> {
        self.items.iter().try_fold(Decimal::ZERO, |acc, item| {
            acc.checked_add(item.checked_line_total()?)
        })
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items
            .iter()
            .fold(0_u32, |acc, item| acc.saturating_add(item.qty))
    }

    /// Look up a line by product id.
    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Lines in insertion order.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Product ids in insertion order.
    pub fn product_ids(&self) -> impl Iterator<Item = &ProductId> {
        self.items.iter().map(|item| &item.id)
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Consume the cart, returning its lines.
    #[must_use]
    pub fn into_items(self) -> Vec<CartItem> {
        self.items
    }
}

impl FromIterator<CartItem> for Cart {
    fn from_iter<T: IntoIterator<Item = CartItem>>(iter: T) -> Self {
        Self::from_lines(iter)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product(id: &str, price: i64) -> Product {
        Product::new(id, format!("Product {id}"), Decimal::new(price, 0), "/img.png")
    }

    #[test]
    fn test_add_appends_with_qty_one() {
        let mut cart = Cart::new();
        cart.add_item(product("a", 10));
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.items()[0].qty, 1);
    }

    #[test]
    fn test_add_twice_merges_into_one_line() {
        let mut cart = Cart::new();
        cart.add_item(product("a", 10));
        cart.add_item(product("a", 10));
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.get(&ProductId::new("a")).unwrap().qty, 2);
    }

    #[test]
    fn test_add_then_remove_restores_cart() {
        let mut cart = Cart::new();
        cart.add_item(product("a", 10));
        cart.add_item(product("b", 5));
        let before = cart.clone();

        cart.add_item(product("c", 3));
        assert!(cart.remove_item(&ProductId::new("c")));
        assert_eq!(cart, before);
    }

    #[test]
    fn test_remove_decrements_before_removing() {
        let mut cart = Cart::new();
        cart.add_item(product("a", 10));
        cart.add_item(product("a", 10));

        cart.remove_item(&ProductId::new("a"));
        assert_eq!(cart.get(&ProductId::new("a")).unwrap().qty, 1);

        cart.remove_item(&ProductId::new("a"));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut cart = Cart::new();
        cart.add_item(product("a", 10));
        assert!(!cart.remove_item(&ProductId::new("zzz")));
        assert_eq!(cart.len(), 1);
    }

    #[test]
    fn test_update_qty_clamps_to_one() {
        let mut cart = Cart::new();
        cart.add_item(product("a", 10));
        assert!(cart.update_qty(&ProductId::new("a"), 0));
        assert_eq!(cart.items()[0].qty, 1);
        assert!(cart.update_qty(&ProductId::new("a"), 7));
        assert_eq!(cart.items()[0].qty, 7);
    }

    #[test]
    fn test_update_qty_missing_is_noop() {
        let mut cart = Cart::new();
        cart.add_item(product("a", 10));
        let before = cart.clone();
        assert!(!cart.update_qty(&ProductId::new("b"), 3));
        assert_eq!(cart, before);
    }

    #[test]
    fn test_total_is_derived() {
        let mut cart = Cart::new();
        cart.add_item(product("a", 10));
        cart.add_item(product("a", 10));
        cart.add_item(product("b", 5));
        assert_eq!(cart.total(), Decimal::new(25, 0));
        assert_eq!(cart.item_count(), 3);
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let mut cart = Cart::new();
        cart.add_item(product("b", 1));
        cart.add_item(product("a", 1));
        cart.add_item(product("b", 1));
        let ids: Vec<_> = cart.product_ids().map(ProductId::as_str).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_overflowing_total_does_not_panic() {
        let huge = CartItem {
            id: ProductId::new("a"),
            name: String::new(),
            price: Decimal::MAX,
            image: String::new(),
            qty: 2,
        };
        let cart = Cart::from_lines(vec![huge]);
        assert_eq!(cart.checked_total(), None);
        assert_eq!(cart.total(), Decimal::MAX);
    }

    #[test]
    fn test_from_lines_collapses_duplicates() {
        let line = |id: &str, qty| CartItem {
            id: ProductId::new(id),
            name: String::new(),
            price: Decimal::ONE,
            image: String::new(),
            qty,
        };
        let cart = Cart::from_lines(vec![line("a", 2), line("b", 0), line("a", 3)]);
        assert_eq!(cart.len(), 2);
        assert_eq!(cart.get(&ProductId::new("a")).unwrap().qty, 5);
        assert_eq!(cart.get(&ProductId::new("b")).unwrap().qty, 1);
    }

    #[test]
    fn test_json_layout_uses_numeric_price() {
        let mut cart = Cart::new();
        cart.add_item(Product::new("a", "Chai", Decimal::new(450, 2), "/chai.png"));
        let json = serde_json::to_value(&cart).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"id": "a", "name": "Chai", "price": 4.5, "image": "/chai.png", "qty": 1}])
        );
    }
}
