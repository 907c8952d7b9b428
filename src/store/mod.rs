//! Persistence ports for the catalog, carts and orders.
//!
//! Handlers and services only see these traits; `postgres` backs them with sqlx and
//! `memory` keeps everything behind one mutex for tests and local runs.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{
    Cart, NewProduct, Order, OrderStatus, PaymentReference, Product, ProductError, ProductPatch, StockAdjustment,
};
use crate::domain::value_objects::{Money, Quantity};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} already exists")]
    Conflict(String),
    #[error(transparent)]
    Invalid(#[from] ProductError),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.limit) }
}

impl Default for PageRequest {
    fn default() -> Self { Self::new(None, None) }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub pages: u32,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64, request: PageRequest) -> Self {
        let limit = i64::from(request.limit);
        let pages = u32::try_from((total + limit - 1) / limit).unwrap_or(u32::MAX);
        Self { data, total, page: request.page, pages }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page { data: self.data.into_iter().map(f).collect(), total: self.total, page: self.page, pages: self.pages }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProductSort {
    #[default]
    CreatedAt,
    Price,
    Name,
    Stock,
}

impl FromStr for ProductSort {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "createdAt" => Ok(Self::CreatedAt),
            "price" => Ok(Self::Price),
            "name" => Ok(Self::Name),
            "stock" => Ok(Self::Stock),
            other => Err(format!("unknown sort field '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort order '{other}'")),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProductQuery {
    pub page: PageRequest,
    /// Case-insensitive substring of either name or the slug. Matched literally.
    pub search: Option<String>,
    pub category_id: Option<Uuid>,
    pub featured_only: bool,
    pub include_inactive: bool,
    pub sort: ProductSort,
    pub direction: SortDirection,
}

/// Active catalog size and the active products running low, lowest stock first.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub active_products: i64,
    pub low_stock: Vec<Product>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub orders: i64,
    /// Sum of order totals currently in `PAID`.
    pub paid_revenue: Money,
}

#[derive(Clone, Debug, Default)]
pub struct OrderQuery {
    pub page: PageRequest,
    pub status: Option<OrderStatus>,
}

/// A completed payment session, correlated back to the cart it was created from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutCompletion {
    pub payment: PaymentReference,
    pub user_id: Uuid,
    pub cart_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: Uuid,
    pub adjustment: StockAdjustment,
}

/// Outcome of the insert-if-absent finalization primitive.
#[derive(Clone, Debug, PartialEq)]
pub enum Finalization {
    Created { order: Order, stock: Vec<StockChange> },
    /// An order already exists for the payment session; nothing was touched.
    AlreadyFinalized { order_id: Uuid },
    CartMissing,
    CartEmpty,
    CartOwnerMismatch { owner: Uuid },
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>, StoreError>;
    async fn product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>, StoreError>;
    async fn create_product(&self, new: NewProduct) -> Result<Product, StoreError>;
    async fn update_product(&self, id: Uuid, patch: ProductPatch) -> Result<Option<Product>, StoreError>;
    /// Soft delete; products are never removed.
    async fn deactivate_product(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn inventory(&self, low_stock_threshold: u32, limit: u32) -> Result<InventorySummary, StoreError>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn cart_for_user(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError>;
    /// Creates the cart on first use; adding a product already in the cart increments its quantity.
    async fn add_item(&self, user_id: Uuid, product_id: Uuid, quantity: Quantity) -> Result<Cart, StoreError>;
    /// `None` when the user has no cart or the product is not in it.
    async fn set_quantity(&self, user_id: Uuid, product_id: Uuid, quantity: Quantity) -> Result<Option<Cart>, StoreError>;
    async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, StoreError>;
    /// Deletes every line and keeps the cart itself. Returns the number of lines removed.
    async fn clear_cart(&self, user_id: Uuid) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates the order for a completed payment session, takes the purchased units out of
    /// stock and empties the cart as one atomic unit, at most once per session id.
    async fn finalize_checkout(&self, completion: &CheckoutCompletion) -> Result<Finalization, StoreError>;
    async fn order_by_payment_session(&self, session_id: &str) -> Result<Option<Order>, StoreError>;
    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;
    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>, StoreError>;
    /// Compare-and-set on the status column. `None` if the order is gone or its status is no longer `expected`.
    async fn update_status(&self, id: Uuid, expected: OrderStatus, next: OrderStatus) -> Result<Option<Order>, StoreError>;
    async fn totals(&self) -> Result<OrderTotals, StoreError>;
}

/// Everything the HTTP layer needs from one backing store.
pub trait Store: CatalogStore + CartStore + OrderStore {}

impl<T: CatalogStore + CartStore + OrderStore> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_bounds() {
        let req = PageRequest::new(Some(0), Some(500));
        assert_eq!(req, PageRequest { page: 1, limit: 100 });
        assert_eq!(PageRequest::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("price".parse::<ProductSort>(), Ok(ProductSort::Price));
        assert_eq!("createdAt".parse::<ProductSort>(), Ok(ProductSort::CreatedAt));
        assert!("price; DROP TABLE products".parse::<ProductSort>().is_err());
        assert_eq!("ASC".parse::<SortDirection>(), Ok(SortDirection::Asc));
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn test_page_count() {
        let page = Page::new(vec![1, 2], 41, PageRequest::new(Some(1), Some(20)));
        assert_eq!(page.pages, 3);
        assert_eq!(Page::<u8>::new(vec![], 0, PageRequest::default()).pages, 0);
    }
}
