//! Application services sitting between the HTTP layer and the store.

pub mod checkout;
pub mod finalizer;
pub mod orders;

pub use checkout::{CheckoutError, CheckoutService, RedirectUrls};
pub use finalizer::{OrderFinalizer, WebhookError, WebhookOutcome};
pub use orders::{OrderAdmin, StatusChangeError};
