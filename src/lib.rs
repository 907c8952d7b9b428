//! Storefront backend
//!
//! Bilingual (English/Spanish) catalog, per-user carts and hosted checkout.
//!
//! ## Checkout flow
//! - `POST /api/stripe/checkout` prices the caller's cart and opens a hosted payment session
//! - the payment provider calls `POST /api/stripe/webhook` once payment is captured
//! - the webhook creates the order, takes the units out of stock and empties the cart,
//!   exactly once per payment session

pub mod api;
pub mod config;
pub mod domain;
pub mod payments;
pub mod publisher;
pub mod services;
pub mod store;

#[cfg(test)]
mod test;

pub use api::{router, AppState};
pub use config::Config;
