//! In-memory store. A single mutex guards all state, so every operation, including
//! checkout finalization, is atomic with respect to every other.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CartStore, CatalogStore, CheckoutCompletion, Finalization, InventorySummary, OrderQuery, OrderStore, OrderTotals,
    Page, ProductQuery, ProductSort, SortDirection, StockChange, StoreError,
};
use crate::domain::aggregates::{Cart, CartLine, NewProduct, Order, OrderStatus, Product, ProductPatch, ProductSnapshot};
use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug)]
struct CartRecord {
    id: Uuid,
    user_id: Uuid,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct ItemRecord {
    cart_id: Uuid,
    product_id: Uuid,
    quantity: Quantity,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, CartRecord>,
    items: Vec<ItemRecord>,
    orders: Vec<Order>,
}

impl State {
    fn cart_of(&self, user_id: Uuid) -> Option<&CartRecord> {
        self.carts.values().find(|c| c.user_id == user_id)
    }

    fn resolve(&self, record: &CartRecord) -> Cart {
        let items = self.items.iter()
            .filter(|i| i.cart_id == record.id)
            .filter_map(|i| self.products.get(&i.product_id).map(|p| CartLine {
                product_id: i.product_id,
                quantity: i.quantity,
                product: ProductSnapshot::from(p),
            }))
            .collect();
        Cart { id: record.id, user_id: record.user_id, created_at: record.created_at, items }
    }

    fn slug_taken(&self, slug: &str, except: Option<Uuid>) -> bool {
        self.products.values().any(|p| p.slug.as_str() == slug && Some(p.id) != except)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

fn compare(a: &Product, b: &Product, sort: ProductSort) -> Ordering {
    match sort {
        ProductSort::CreatedAt => a.created_at.cmp(&b.created_at),
        ProductSort::Price => a.price.cmp(&b.price),
        ProductSort::Name => a.name.en.to_lowercase().cmp(&b.name.en.to_lowercase()),
        ProductSort::Stock => a.stock.cmp(&b.stock),
    }
    .then(a.id.cmp(&b.id))
}

fn paginate<T>(mut all: Vec<T>, request: super::PageRequest) -> Page<T> {
    let total = i64::try_from(all.len()).unwrap_or(i64::MAX);
    let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX).min(all.len());
    let data: Vec<T> = all.drain(offset..).take(request.limit as usize).collect();
    Page::new(data, total, request)
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>, StoreError> {
        let state = self.state.lock().await;
        let needle = query.search.as_deref().map(str::to_lowercase);
        let mut matches: Vec<Product> = state.products.values()
            .filter(|p| query.include_inactive || p.active)
            .filter(|p| query.category_id.map_or(true, |c| p.category_id == Some(c)))
            .filter(|p| !query.featured_only || p.featured)
            .filter(|p| needle.as_deref().map_or(true, |n| {
                p.name.en.to_lowercase().contains(n)
                    || p.name.es.as_deref().is_some_and(|es| es.to_lowercase().contains(n))
                    || p.slug.as_str().contains(n)
            }))
            .cloned()
            .collect();
        matches.sort_by(|a, b| match query.direction {
            SortDirection::Asc => compare(a, b, query.sort),
            SortDirection::Desc => compare(b, a, query.sort),
        });
        Ok(paginate(matches, query.page))
    }

    async fn product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.values().find(|p| p.slug.as_str() == slug).cloned())
    }

    async fn create_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        let mut state = self.state.lock().await;
        if state.slug_taken(new.slug.as_str(), None) {
            return Err(StoreError::Conflict(format!("product slug '{}'", new.slug)));
        }
        let product = Product::create(new)?;
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, id: Uuid, patch: ProductPatch) -> Result<Option<Product>, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(slug) = &patch.slug {
            if state.slug_taken(slug.as_str(), Some(id)) {
                return Err(StoreError::Conflict(format!("product slug '{slug}'")));
            }
        }
        let Some(product) = state.products.get_mut(&id) else { return Ok(None) };
        let mut updated = product.clone();
        updated.apply(patch)?;
        *product = updated.clone();
        Ok(Some(updated))
    }

    async fn deactivate_product(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.products.get_mut(&id).map(Product::deactivate).is_some())
    }

    async fn inventory(&self, low_stock_threshold: u32, limit: u32) -> Result<InventorySummary, StoreError> {
        let state = self.state.lock().await;
        let active: Vec<&Product> = state.products.values().filter(|p| p.active).collect();
        let mut low_stock: Vec<Product> = active.iter().filter(|p| p.stock <= low_stock_threshold).map(|p| (*p).clone()).collect();
        low_stock.sort_by(|a, b| compare(a, b, ProductSort::Stock));
        low_stock.truncate(limit as usize);
        Ok(InventorySummary { active_products: i64::try_from(active.len()).unwrap_or(i64::MAX), low_stock })
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn cart_for_user(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.cart_of(user_id).map(|c| state.resolve(c)))
    }

    async fn add_item(&self, user_id: Uuid, product_id: Uuid, quantity: Quantity) -> Result<Cart, StoreError> {
        let mut state = self.state.lock().await;
        let existing = state.cart_of(user_id).cloned();
        let record = match existing {
            Some(record) => record,
            None => {
                let record = CartRecord { id: Uuid::now_v7(), user_id, created_at: Utc::now() };
                state.carts.insert(record.id, record.clone());
                record
            }
        };
        match state.items.iter_mut().find(|i| i.cart_id == record.id && i.product_id == product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(quantity),
            None => state.items.push(ItemRecord { cart_id: record.id, product_id, quantity }),
        }
        Ok(state.resolve(&record))
    }

    async fn set_quantity(&self, user_id: Uuid, product_id: Uuid, quantity: Quantity) -> Result<Option<Cart>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(record) = state.cart_of(user_id).cloned() else { return Ok(None) };
        let Some(item) = state.items.iter_mut().find(|i| i.cart_id == record.id && i.product_id == product_id) else {
            return Ok(None);
        };
        item.quantity = quantity;
        Ok(Some(state.resolve(&record)))
    }

    async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(cart_id) = state.cart_of(user_id).map(|c| c.id) else { return Ok(false) };
        let before = state.items.len();
        state.items.retain(|i| !(i.cart_id == cart_id && i.product_id == product_id));
        Ok(state.items.len() != before)
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let Some(cart_id) = state.cart_of(user_id).map(|c| c.id) else { return Ok(0) };
        let before = state.items.len();
        state.items.retain(|i| i.cart_id != cart_id);
        Ok((before - state.items.len()) as u64)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn finalize_checkout(&self, completion: &CheckoutCompletion) -> Result<Finalization, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.orders.iter().find(|o| o.payment_session_id == completion.payment.session_id) {
            return Ok(Finalization::AlreadyFinalized { order_id: existing.id });
        }
        let Some(record) = state.carts.get(&completion.cart_id).cloned() else { return Ok(Finalization::CartMissing) };
        if record.user_id != completion.user_id {
            return Ok(Finalization::CartOwnerMismatch { owner: record.user_id });
        }
        let cart = state.resolve(&record);
        if cart.is_empty() { return Ok(Finalization::CartEmpty); }
        let order = Order::from_cart(&cart, completion.payment.clone())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut stock = Vec::with_capacity(cart.line_count());
        for line in cart.items() {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                stock.push(StockChange { product_id: line.product_id, adjustment: product.remove_stock(line.quantity) });
            }
        }
        state.items.retain(|i| i.cart_id != record.id);
        state.orders.push(order.clone());
        Ok(Finalization::Created { order, stock })
    }

    async fn order_by_payment_session(&self, session_id: &str) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.orders.iter().find(|o| o.payment_session_id == session_id).cloned())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.iter().filter(|o| o.user_id == user_id).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.iter()
            .filter(|o| query.status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(orders, query.page))
    }

    async fn update_status(&self, id: Uuid, expected: OrderStatus, next: OrderStatus) -> Result<Option<Order>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.iter_mut().find(|o| o.id == id && o.status == expected) else { return Ok(None) };
        order.status = next;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn totals(&self) -> Result<OrderTotals, StoreError> {
        let state = self.state.lock().await;
        Ok(OrderTotals {
            orders: i64::try_from(state.orders.len()).unwrap_or(i64::MAX),
            paid_revenue: state.orders.iter().filter(|o| o.status == OrderStatus::Paid).map(|o| o.total).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::PaymentReference;
    use crate::domain::value_objects::{LocalizedText, Money, Slug};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn seed(store: &MemoryStore, slug: &str, stock: u32) -> Product {
        store.create_product(NewProduct {
            slug: Slug::new(slug).unwrap(), name: LocalizedText::new(slug, None), description: LocalizedText::default(),
            price: Money::new(dec!(89.99)), compare_at_price: None, stock, featured: false, category_id: None,
            image_urls: vec![],
        }).await.unwrap()
    }

    fn completion(cart: &Cart, session: &str) -> CheckoutCompletion {
        CheckoutCompletion {
            payment: PaymentReference { session_id: session.into(), transaction_id: Some("pi_1".into()) },
            user_id: cart.user_id,
            cart_id: cart.id,
        }
    }

    #[tokio::test]
    async fn test_add_item_merges_lines() {
        let store = MemoryStore::new();
        let p = seed(&store, "mug", 10).await;
        let user = Uuid::now_v7();
        store.add_item(user, p.id, Quantity::new(2).unwrap()).await.unwrap();
        let cart = store.add_item(user, p.id, Quantity::ONE).await.unwrap();
        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.items()[0].quantity.value(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_slug_conflicts() {
        let store = MemoryStore::new();
        seed(&store, "mug", 1).await;
        let err = store.create_product(NewProduct {
            slug: Slug::new("mug").unwrap(), name: LocalizedText::new("Mug", None), description: LocalizedText::default(),
            price: Money::ZERO, compare_at_price: None, stock: 0, featured: false, category_id: None, image_urls: vec![],
        }).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_finalize_is_once_per_session() {
        let store = MemoryStore::new();
        let p = seed(&store, "mug", 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(2).unwrap()).await.unwrap();

        let first = store.finalize_checkout(&completion(&cart, "cs_1")).await.unwrap();
        let Finalization::Created { order, .. } = first else { panic!("expected an order") };
        let second = store.finalize_checkout(&completion(&cart, "cs_1")).await.unwrap();
        assert_eq!(second, Finalization::AlreadyFinalized { order_id: order.id });

        assert_eq!(store.product(p.id).await.unwrap().unwrap().stock, 3);
        let cart_after = store.cart_for_user(cart.user_id).await.unwrap().unwrap();
        assert_eq!(cart_after.id, cart.id);
        assert!(cart_after.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_finalize_creates_one_order() {
        let store = Arc::new(MemoryStore::new());
        let p = seed(&store, "mug", 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(2).unwrap()).await.unwrap();

        let handles: Vec<_> = (0..8).map(|_| {
            let store = Arc::clone(&store);
            let completion = completion(&cart, "cs_race");
            tokio::spawn(async move { store.finalize_checkout(&completion).await.unwrap() })
        }).collect();
        let mut created = 0;
        for h in handles {
            if matches!(h.await.unwrap(), Finalization::Created { .. }) { created += 1; }
        }
        assert_eq!(created, 1);
        assert_eq!(store.product(p.id).await.unwrap().unwrap().stock, 3);
    }

    #[tokio::test]
    async fn test_lines_are_priced_at_finalization() {
        let store = MemoryStore::new();
        let p = seed(&store, "tote", 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(2).unwrap()).await.unwrap();
        let patch = ProductPatch { price: Some(Money::new(dec!(20.00))), ..ProductPatch::default() };
        store.update_product(p.id, patch).await.unwrap();

        let Finalization::Created { order, .. } = store.finalize_checkout(&completion(&cart, "cs_repriced")).await.unwrap() else {
            panic!("expected an order");
        };
        assert_eq!(order.items[0].unit_price.amount(), dec!(20.00));
        assert_eq!(order.total.amount(), dec!(40.00));
    }

    #[tokio::test]
    async fn test_finalize_rejects_foreign_cart() {
        let store = MemoryStore::new();
        let p = seed(&store, "mug", 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::ONE).await.unwrap();
        let mut c = completion(&cart, "cs_2");
        c.user_id = Uuid::now_v7();
        assert_eq!(store.finalize_checkout(&c).await.unwrap(), Finalization::CartOwnerMismatch { owner: cart.user_id });
        c.cart_id = Uuid::now_v7();
        assert_eq!(store.finalize_checkout(&c).await.unwrap(), Finalization::CartMissing);
        assert_eq!(store.product(p.id).await.unwrap().unwrap().stock, 5);
    }

    #[tokio::test]
    async fn test_update_status_is_compare_and_set() {
        let store = MemoryStore::new();
        let p = seed(&store, "mug", 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::ONE).await.unwrap();
        let Finalization::Created { order, .. } = store.finalize_checkout(&completion(&cart, "cs_3")).await.unwrap() else {
            panic!("expected an order");
        };
        let updated = store.update_status(order.id, OrderStatus::Paid, OrderStatus::Processing).await.unwrap();
        assert_eq!(updated.map(|o| o.status), Some(OrderStatus::Processing));
        assert!(store.update_status(order.id, OrderStatus::Paid, OrderStatus::Shipped).await.unwrap().is_none());
    }
}
