//! Amor Chai storefront library.
//!
//! Two halves share this crate:
//!
//! - The API server: delivery-zone checks, Stripe payment intents and
//!   hosted checkout, webhooks, and the Supabase auth callback
//!   ([`routes`], [`state`], [`middleware`]).
//! - The client-side session library: cart synchronization, identity
//!   lifecycle, checkout flow, and liked products ([`context`] ties them
//!   together).

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod checkout;
pub mod config;
pub mod context;
pub mod deadline;
pub mod error;
pub mod identity;
pub mod likes;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod stripe;
pub mod supabase;
