//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{NewProduct, Product, ProductError, ProductPatch, StockAdjustment};
pub use order::{Order, OrderError, OrderItem, OrderStatus, PaymentReference, TransitionPolicy};
pub use cart::{Cart, CartLine, CartSummary, ProductSnapshot};
