//! Amor Chai Core - Shared domain types and rules.
//!
//! This crate provides the pieces of the storefront that are pure functions
//! of their inputs and are shared by every other component:
//! - `storefront` - HTTP API server and the client-side session library
//! - `cli` - Terminal shopping client
//!
//! # Architecture
//!
//! The core crate contains only types and rules - no I/O, no storage access,
//! no HTTP clients. This keeps it lightweight and lets the same delivery-zone
//! gate run on both the advisory (client) and authoritative (server) side.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, money helpers, payment statuses
//! - [`cart`] - The cart value type and its mutation rules
//! - [`delivery`] - The delivery-zone gate (haversine radius and postal allowlist)
//! - [`pricing`] - Order totals, tax, and minor-unit amounts

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod delivery;
pub mod pricing;
pub mod types;

pub use cart::{Cart, CartItem, Product};
pub use delivery::{
    Coordinate, DeliveryAddress, DeliveryZone, DeliveryZoneResult, PostalCodeAllowlist,
    ZoneCheckError,
};
pub use pricing::{OrderTotals, PricingError};
pub use types::*;
