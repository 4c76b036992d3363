//! Command implementations.

pub mod auth;
pub mod cart;
pub mod checkout;
pub mod payment;
pub mod zone;

use amor_chai_storefront::checkout::PaymentInitError;
use amor_chai_storefront::config::ConfigError;
use amor_chai_storefront::context::ContextError;
use amor_chai_storefront::identity::IdentityError;
use thiserror::Error;

/// Errors surfaced to the terminal.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Sign-in failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    Payment(#[from] PaymentInitError),

    #[error("Product not in cart: {0}")]
    NotInCart(String),

    #[error("Checkout refused: {0}")]
    CheckoutRefused(String),
}
