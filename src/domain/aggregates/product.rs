//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{LocalizedText, Money, Quantity, Slug};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub slug: Slug,
    pub name: LocalizedText,
    pub description: LocalizedText,
    pub price: Money,
    pub compare_at_price: Option<Money>,
    pub stock: u32,
    pub active: bool,
    pub featured: bool,
    pub category_id: Option<Uuid>,
    pub image_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of taking purchased units out of stock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StockAdjustment {
    pub before: u32,
    pub after: u32,
    /// Units sold beyond what was on hand; stock is clamped at zero instead of going negative.
    pub shortfall: u32,
}

impl StockAdjustment {
    pub fn compute(before: u32, sold: Quantity) -> Self {
        let sold = sold.value();
        Self { before, after: before.saturating_sub(sold), shortfall: sold.saturating_sub(before) }
    }
}

impl Product {
    pub fn create(new: NewProduct) -> Result<Self, ProductError> {
        new.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), slug: new.slug, name: new.name, description: new.description,
            price: new.price, compare_at_price: new.compare_at_price, stock: new.stock, active: true,
            featured: new.featured, category_id: new.category_id, image_urls: new.image_urls,
            created_at: now, updated_at: now,
        })
    }

    pub fn is_in_stock(&self) -> bool { self.stock > 0 }

    /// Advisory availability check made when a line is added to a cart.
    pub fn ensure_available(&self, qty: Quantity) -> Result<(), ProductError> {
        if !self.active { return Err(ProductError::Inactive); }
        if qty.value() > self.stock { return Err(ProductError::InsufficientStock { requested: qty.value(), available: self.stock }); }
        Ok(())
    }

    pub fn remove_stock(&mut self, qty: Quantity) -> StockAdjustment {
        let adjustment = StockAdjustment::compute(self.stock, qty);
        self.stock = adjustment.after;
        self.touch();
        adjustment
    }

    pub fn apply(&mut self, patch: ProductPatch) -> Result<(), ProductError> {
        if patch.price.is_some_and(|p| p.is_negative()) { return Err(ProductError::NegativePrice); }
        if patch.name.as_ref().is_some_and(|n| n.en.trim().is_empty()) { return Err(ProductError::MissingName); }
        if let Some(slug) = patch.slug { self.slug = slug; }
        if let Some(name) = patch.name { self.name = name; }
        if let Some(description) = patch.description { self.description = description; }
        if let Some(price) = patch.price { self.price = price; }
        if let Some(compare_at) = patch.compare_at_price { self.compare_at_price = compare_at; }
        if let Some(stock) = patch.stock { self.stock = stock; }
        if let Some(active) = patch.active { self.active = active; }
        if let Some(featured) = patch.featured { self.featured = featured; }
        if let Some(category_id) = patch.category_id { self.category_id = category_id; }
        if let Some(image_urls) = patch.image_urls { self.image_urls = image_urls; }
        self.touch();
        Ok(())
    }

    pub fn deactivate(&mut self) { self.active = false; self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// Fields accepted when an admin creates a product.
#[derive(Clone, Debug)]
pub struct NewProduct {
    pub slug: Slug,
    pub name: LocalizedText,
    pub description: LocalizedText,
    pub price: Money,
    pub compare_at_price: Option<Money>,
    pub stock: u32,
    pub featured: bool,
    pub category_id: Option<Uuid>,
    pub image_urls: Vec<String>,
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), ProductError> {
        if self.name.en.trim().is_empty() { return Err(ProductError::MissingName); }
        if self.price.is_negative() { return Err(ProductError::NegativePrice); }
        Ok(())
    }
}

/// Partial update; `Some(None)` clears an optional field.
#[derive(Clone, Debug, Default)]
pub struct ProductPatch {
    pub slug: Option<Slug>,
    pub name: Option<LocalizedText>,
    pub description: Option<LocalizedText>,
    pub price: Option<Money>,
    pub compare_at_price: Option<Option<Money>>,
    pub stock: Option<u32>,
    pub active: Option<bool>,
    pub featured: Option<bool>,
    pub category_id: Option<Option<Uuid>>,
    pub image_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("product name is required")]
    MissingName,
    #[error("price must not be negative")]
    NegativePrice,
    #[error("product is not available")]
    Inactive,
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },
}
