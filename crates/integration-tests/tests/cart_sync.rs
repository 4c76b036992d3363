//! Integration tests for cart persistence across sessions.
//!
//! A `ClientContext` runs against in-memory local storage, a fake identity
//! provider, and an in-memory remote cart table. No server is needed; the
//! storefront API URL points at a closed port.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use amor_chai_core::{Cart, CartItem, ProductId};
use amor_chai_integration_tests::{
    ClientHarness, FakeIdentity, MemoryCartStore, product, unreachable_url,
};
use amor_chai_storefront::cart::SyncOutcome;
use amor_chai_storefront::cart::format::from_storage_format;
use amor_chai_storefront::cart::storage::{CART_KEY, LocalStore, MemoryLocalStore};
use amor_chai_storefront::context::ClientContext;
use amor_chai_storefront::identity::{IdentityError, SignOutOutcome};
use rust_decimal::Decimal;

const EMAIL: &str = "regular@example.com";
const PASSWORD: &str = "masala-chai";

async fn started(harness: &ClientHarness) -> ClientContext {
    let context = harness.context(unreachable_url().await);
    context.start().await;
    context
}

fn stored_cart(store: &MemoryLocalStore) -> Option<Cart> {
    store
        .get(CART_KEY)
        .unwrap()
        .map(|raw| from_storage_format(&raw).unwrap())
}

// =============================================================================
// Anonymous carts
// =============================================================================

#[tokio::test]
async fn test_anonymous_cart_survives_restart() {
    let harness = ClientHarness::new(FakeIdentity::new(EMAIL, PASSWORD));

    let first = started(&harness).await;
    first.cart().add_item(product("classic-chai", "Classic Chai", 499));
    first.cart().add_item(product("classic-chai", "Classic Chai", 499));
    first.cart().add_item(product("dirty-chai", "Dirty Chai", 599));
    assert!(first.cart().remove_item(&ProductId::new("dirty-chai")));
    first.shutdown().await;

    let second = started(&harness).await;
    let cart = second.cart().cart();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart.items()[0].qty, 2);
    assert_eq!(second.cart().item_count(), 2);

    // Nobody is signed in, so nothing reaches the remote table
    assert_eq!(harness.remote.writes(), 0);
}

#[tokio::test]
async fn test_local_mirror_matches_cart() {
    let harness = ClientHarness::new(FakeIdentity::new(EMAIL, PASSWORD));
    let context = started(&harness).await;

    context.cart().add_item(product("classic-chai", "Classic Chai", 499));
    context.cart().add_item(product("iced-chai", "Iced Chai", 550));
    assert!(context.cart().update_qty(&ProductId::new("iced-chai"), 4));

    assert_eq!(stored_cart(&harness.store), Some(context.cart().cart()));

    context.cart().clear();
    assert_eq!(stored_cart(&harness.store), None);
}

#[tokio::test]
async fn test_unavailable_local_storage_keeps_cart_in_memory() {
    let harness = ClientHarness::new(FakeIdentity::new(EMAIL, PASSWORD));
    harness.store.set_available(false);
    let context = started(&harness).await;

    context.cart().add_item(product("classic-chai", "Classic Chai", 499));

    assert_eq!(context.cart().item_count(), 1);
}

// =============================================================================
// Signing in
// =============================================================================

#[tokio::test]
async fn test_sign_in_replaces_cart_with_remote_cart() {
    let harness = ClientHarness::new(FakeIdentity::new(EMAIL, PASSWORD));
    let user = harness.identity.user_id();

    let saved_elsewhere = CartItem {
        id: ProductId::new("iced-chai"),
        name: "Iced Chai".to_string(),
        price: Decimal::new(550, 2),
        image: "/images/iced-chai.png".to_string(),
        qty: 3,
    };
    harness.remote.seed(user, &[saved_elsewhere]);

    let context = started(&harness).await;
    context.cart().add_item(product("classic-chai", "Classic Chai", 499));

    let signed_in = context.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(signed_in.id, user);

    let cart = context.cart().cart();
    assert_eq!(cart, harness.remote.cart_for(user));
    assert_eq!(cart.items()[0].id, ProductId::new("iced-chai"));
    assert_eq!(cart.items()[0].qty, 3);
    assert_eq!(context.cart().owner(), Some(user));
    assert_eq!(stored_cart(&harness.store), Some(cart));

    // Adopting the remote cart is a read, not a write
    assert_eq!(harness.remote.writes(), 0);
}

#[tokio::test]
async fn test_wrong_password_leaves_cart_alone() {
    let harness = ClientHarness::new(FakeIdentity::new(EMAIL, PASSWORD));
    let context = started(&harness).await;
    context.cart().add_item(product("classic-chai", "Classic Chai", 499));

    let err = context.sign_in(EMAIL, "chai-latte").await.unwrap_err();

    assert!(matches!(err, IdentityError::InvalidCredentials));
    assert_eq!(context.cart().item_count(), 1);
    assert_eq!(context.cart().owner(), None);
}

#[tokio::test]
async fn test_remote_read_failure_keeps_current_cart() {
    let harness = ClientHarness::new(FakeIdentity::new(EMAIL, PASSWORD));
    harness.remote.fail_reads(true);

    let context = started(&harness).await;
    context.cart().add_item(product("classic-chai", "Classic Chai", 499));
    context.sign_in(EMAIL, PASSWORD).await.unwrap();

    assert_eq!(context.cart().item_count(), 1);
    assert_eq!(context.cart().owner(), Some(harness.identity.user_id()));
}

// =============================================================================
// Signed-in edits
// =============================================================================

#[tokio::test]
async fn test_signed_in_edits_reach_remote_table() {
    let harness = ClientHarness::new(FakeIdentity::signed_in(EMAIL, PASSWORD));
    let user = harness.identity.user_id();
    let context = started(&harness).await;
    let chai = ProductId::new("classic-chai");

    context.cart().add_item(product("classic-chai", "Classic Chai", 499));
    assert_eq!(context.cart().settle().await, vec![SyncOutcome::Synced]);
    assert_eq!(harness.remote.rows_for(user).len(), 1);

    assert!(context.cart().update_qty(&chai, 3));
    context.cart().settle().await;
    assert_eq!(harness.remote.rows_for(user)[0].quantity, Some(3));

    context.cart().add_item(product("dirty-chai", "Dirty Chai", 599));
    context.cart().settle().await;
    assert!(context.cart().update_qty(&chai, 0));
    context.cart().settle().await;
    assert_eq!(harness.remote.cart_for(user), context.cart().cart());
    assert_eq!(harness.remote.cart_for(user).get(&chai).unwrap().qty, 1);

    context.cart().clear();
    context.cart().settle().await;
    assert!(harness.remote.rows_for(user).is_empty());
}

#[tokio::test]
async fn test_removed_lines_are_deleted_remotely() {
    let harness = ClientHarness::new(FakeIdentity::signed_in(EMAIL, PASSWORD));
    let user = harness.identity.user_id();
    let context = started(&harness).await;

    context.cart().add_item(product("classic-chai", "Classic Chai", 499));
    context.cart().settle().await;
    context.cart().add_item(product("dirty-chai", "Dirty Chai", 599));
    context.cart().settle().await;
    assert_eq!(harness.remote.rows_for(user).len(), 2);

    assert!(context.cart().remove_item(&ProductId::new("dirty-chai")));
    context.cart().settle().await;

    let rows = harness.remote.rows_for(user);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].product_id, ProductId::new("classic-chai"));
}

#[tokio::test]
async fn test_missing_remote_table_keeps_cart_local() {
    let harness = ClientHarness::new(FakeIdentity::signed_in(EMAIL, PASSWORD));
    harness.remote.drop_table();
    let context = started(&harness).await;

    context.cart().add_item(product("classic-chai", "Classic Chai", 499));

    assert_eq!(context.cart().settle().await, vec![SyncOutcome::NotProvisioned]);
    assert_eq!(context.cart().item_count(), 1);
    assert_eq!(stored_cart(&harness.store), Some(context.cart().cart()));
}

#[tokio::test]
async fn test_remote_cart_follows_user_to_new_device() {
    let identity = FakeIdentity::signed_in(EMAIL, PASSWORD);
    let remote = MemoryCartStore::new();

    let laptop = ClientHarness {
        store: Arc::new(MemoryLocalStore::new()),
        identity: Arc::clone(&identity),
        remote: Arc::clone(&remote),
    };
    let context = started(&laptop).await;
    context.cart().add_item(product("classic-chai", "Classic Chai", 499));
    context.cart().settle().await;
    context.cart().add_item(product("classic-chai", "Classic Chai", 499));
    context.shutdown().await;

    let phone = ClientHarness {
        store: Arc::new(MemoryLocalStore::new()),
        identity,
        remote,
    };
    let context = phone.context(unreachable_url().await);
    assert_eq!(context.start().await, Some(phone.identity.user_id()));

    let cart = context.cart().cart();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart.items()[0].qty, 2);
    assert_eq!(stored_cart(&phone.store), Some(cart));
}

// =============================================================================
// Signing out
// =============================================================================

#[tokio::test]
async fn test_sign_out_clears_cart_and_local_storage() {
    let harness = ClientHarness::new(FakeIdentity::signed_in(EMAIL, PASSWORD));
    let user = harness.identity.user_id();
    harness
        .store
        .set("sb-project-auth-token", "{\"access_token\":\"x\"}")
        .unwrap();
    let context = started(&harness).await;

    context.cart().add_item(product("classic-chai", "Classic Chai", 499));
    context.cart().settle().await;

    let outcome = context.sign_out().await;

    assert_eq!(
        outcome,
        SignOutOutcome::Completed {
            remote_confirmed: true
        }
    );
    assert!(outcome.message().is_some());
    assert!(context.cart().cart().is_empty());
    assert_eq!(context.cart().owner(), None);
    assert_eq!(context.session().user_id(), None);
    assert_eq!(harness.store.get(CART_KEY).unwrap(), None);
    assert_eq!(harness.store.get("sb-project-auth-token").unwrap(), None);

    // The saved cart stays with the account for the next sign-in
    assert_eq!(harness.remote.rows_for(user).len(), 1);
    context.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(context.cart().item_count(), 1);
}

#[tokio::test]
async fn test_sign_out_provider_failure_still_signs_out_locally() {
    let harness = ClientHarness::new(FakeIdentity::signed_in(EMAIL, PASSWORD));
    harness.identity.fail_sign_out();
    let context = started(&harness).await;
    context.cart().add_item(product("classic-chai", "Classic Chai", 499));
    context.cart().settle().await;

    let outcome = context.sign_out().await;

    assert_eq!(
        outcome,
        SignOutOutcome::Completed {
            remote_confirmed: false
        }
    );
    assert_eq!(harness.identity.sign_out_calls(), 1);
    assert!(context.cart().cart().is_empty());
    assert_eq!(context.session().user_id(), None);
}

#[tokio::test]
async fn test_edits_after_sign_out_stay_local() {
    let harness = ClientHarness::new(FakeIdentity::signed_in(EMAIL, PASSWORD));
    let context = started(&harness).await;
    context.sign_out().await;
    let writes = harness.remote.writes();

    context.cart().add_item(product("classic-chai", "Classic Chai", 499));

    assert!(context.cart().settle().await.is_empty());
    assert_eq!(harness.remote.writes(), writes);
    assert_eq!(context.cart().item_count(), 1);
}
