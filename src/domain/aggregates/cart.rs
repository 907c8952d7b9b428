//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::product::Product;
use crate::domain::value_objects::{LocalizedText, Money, Quantity};

/// A user's cart with every line resolved against the catalog at read time.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub items: Vec<CartLine>,
}

/// Catalog fields a cart line needs for display, checkout and finalization.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub slug: String,
    pub name: LocalizedText,
    pub price: Money,
    pub image_urls: Vec<String>,
    pub stock: u32,
    pub active: bool,
}

impl From<&Product> for ProductSnapshot {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id, slug: p.slug.to_string(), name: p.name.clone(), price: p.price,
            image_urls: p.image_urls.clone(), stock: p.stock, active: p.active,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: Quantity,
    pub product: ProductSnapshot,
}

impl CartLine {
    pub fn line_total(&self) -> Money { self.product.price.times(self.quantity) }
}

impl Cart {
    pub fn empty_for(user_id: Uuid) -> Self {
        Self { id: Uuid::now_v7(), user_id, created_at: Utc::now(), items: vec![] }
    }

    pub fn items(&self) -> &[CartLine] { &self.items }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn line_count(&self) -> usize { self.items.len() }
    pub fn unit_count(&self) -> u32 { self.items.iter().map(|i| i.quantity.value()).sum() }
    pub fn subtotal(&self) -> Money { self.items.iter().map(CartLine::line_total).sum() }
}

/// Response body for cart reads.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub id: Option<Uuid>,
    pub items: Vec<CartLine>,
    pub subtotal: Money,
    pub unit_count: u32,
}

impl From<Option<Cart>> for CartSummary {
    fn from(cart: Option<Cart>) -> Self {
        match cart {
            Some(cart) => Self { id: Some(cart.id), subtotal: cart.subtotal(), unit_count: cart.unit_count(), items: cart.items },
            None => Self { id: None, items: vec![], subtotal: Money::ZERO, unit_count: 0 },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub(crate) fn line(price: Decimal, qty: u32) -> CartLine {
        let id = Uuid::now_v7();
        CartLine {
            product_id: id,
            quantity: Quantity::new(qty).unwrap(),
            product: ProductSnapshot {
                id, slug: format!("p-{id}"), name: LocalizedText::new("Widget", None), price: Money::new(price),
                image_urls: vec![], stock: 10, active: true,
            },
        }
    }

    #[test]
    fn test_cart_totals() {
        let mut cart = Cart::empty_for(Uuid::now_v7());
        assert!(cart.is_empty());
        cart.items.push(line(dec!(89.99), 2));
        cart.items.push(line(dec!(5.00), 1));
        assert_eq!(cart.line_count(), 2);
        assert_eq!(cart.unit_count(), 3);
        assert_eq!(cart.subtotal().amount(), dec!(184.98));
    }

    #[test]
    fn test_summary_of_missing_cart() {
        let summary = CartSummary::from(None);
        assert_eq!(summary.id, None);
        assert_eq!(summary.subtotal, Money::ZERO);
    }
}
