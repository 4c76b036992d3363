//! Cart commands.
//!
//! Mutations are written to local storage before returning. Remote writes
//! for a signed-in user finish when the context shuts down.

use amor_chai_core::{CurrencyCode, OrderTotals, Product, ProductId};
use amor_chai_storefront::context::ClientContext;
use rust_decimal::Decimal;

use super::CliError;

/// Print every line and the order totals.
#[allow(clippy::print_stdout)]
pub fn show(context: &ClientContext) {
    let cart = context.cart().cart();
    if cart.is_empty() {
        println!("Your cart is empty.");
        return;
    }

    let usd = CurrencyCode::USD;
    for item in cart.items() {
        println!(
            "{:>3} x {:<24} {:>10}  ({})",
            item.qty,
            item.name,
            usd.format(item.line_total()),
            item.id
        );
    }

    match OrderTotals::for_cart(&cart) {
        Ok(totals) => {
            println!("Subtotal: {}", usd.format(totals.subtotal));
            println!("Tax:      {}", usd.format(totals.tax));
            println!("Total:    {}", usd.format(totals.total));
        }
        Err(e) => println!("Total:    unavailable ({e})"),
    }
}

pub fn add(context: &ClientContext, id: String, name: String, price: Decimal, image: String) {
    context
        .cart()
        .add_item(Product::new(id, name, price, image));
}

/// Remove one unit of a product.
///
/// # Errors
///
/// Returns `CliError::NotInCart` if the product is not in the cart.
pub fn remove(context: &ClientContext, id: &str) -> Result<(), CliError> {
    if context.cart().remove_item(&ProductId::new(id)) {
        Ok(())
    } else {
        Err(CliError::NotInCart(id.to_string()))
    }
}

/// Set the quantity of a line.
///
/// # Errors
///
/// Returns `CliError::NotInCart` if the product is not in the cart.
pub fn set_qty(context: &ClientContext, id: &str, qty: u32) -> Result<(), CliError> {
    if context.cart().update_qty(&ProductId::new(id), qty) {
        Ok(())
    } else {
        Err(CliError::NotInCart(id.to_string()))
    }
}

pub fn clear(context: &ClientContext) {
    context.cart().clear();
}
