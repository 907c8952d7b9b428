//! Postgres store built on sqlx runtime queries.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    CartStore, CatalogStore, CheckoutCompletion, Finalization, InventorySummary, OrderQuery, OrderStore, OrderTotals,
    Page, ProductQuery, ProductSort, SortDirection, StockChange, StoreError,
};
use crate::domain::aggregates::{
    Cart, CartLine, NewProduct, Order, OrderItem, OrderStatus, Product, ProductPatch, ProductSnapshot, StockAdjustment,
};
use crate::domain::value_objects::{LocalizedText, Money, Quantity, Slug};

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid, slug: String, name_en: String, name_es: Option<String>, description_en: String,
    description_es: Option<String>, price: Decimal, compare_at_price: Option<Decimal>, stock: i32,
    active: bool, featured: bool, category_id: Option<Uuid>, image_urls: Vec<String>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow { id: Uuid, user_id: Uuid, created_at: DateTime<Utc> }

#[derive(Debug, sqlx::FromRow)]
struct CartLineRow {
    product_id: Uuid, quantity: i32, slug: String, name_en: String, name_es: Option<String>,
    price: Decimal, image_urls: Vec<String>, stock: i32, active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid, user_id: Uuid, status: String, subtotal: Decimal, total: Decimal, payment_session_id: String,
    payment_transaction_id: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid, order_id: Uuid, product_id: Uuid, product_name: String, quantity: i32, unit_price: Decimal, line_total: Decimal,
}

fn corrupt(what: &str, id: Uuid, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what} {id}: {err}"))
}

fn stock_from_db(id: Uuid, stock: i32) -> Result<u32, StoreError> {
    u32::try_from(stock).map_err(|e| corrupt("product stock", id, e))
}

fn stock_to_db(stock: u32) -> i32 { i32::try_from(stock).unwrap_or(i32::MAX) }
fn qty_to_db(q: Quantity) -> i32 { stock_to_db(q.value()) }

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;
    fn try_from(r: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            slug: Slug::new(r.slug).map_err(|e| corrupt("product slug", r.id, e))?,
            stock: stock_from_db(r.id, r.stock)?,
            id: r.id, name: LocalizedText::new(r.name_en, r.name_es),
            description: LocalizedText::new(r.description_en, r.description_es), price: Money::new(r.price),
            compare_at_price: r.compare_at_price.map(Money::new), active: r.active, featured: r.featured,
            category_id: r.category_id, image_urls: r.image_urls, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

impl TryFrom<CartLineRow> for CartLine {
    type Error = StoreError;
    fn try_from(r: CartLineRow) -> Result<Self, Self::Error> {
        Ok(CartLine {
            product_id: r.product_id,
            quantity: Quantity::try_from(r.quantity).map_err(|e| corrupt("cart line for product", r.product_id, e))?,
            product: ProductSnapshot {
                id: r.product_id, slug: r.slug, name: LocalizedText::new(r.name_en, r.name_es),
                price: Money::new(r.price), image_urls: r.image_urls,
                stock: stock_from_db(r.product_id, r.stock)?, active: r.active,
            },
        })
    }
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;
    fn try_from(r: OrderItemRow) -> Result<Self, Self::Error> {
        Ok(OrderItem {
            quantity: Quantity::try_from(r.quantity).map_err(|e| corrupt("order item", r.id, e))?,
            id: r.id, product_id: r.product_id, product_name: r.product_name,
            unit_price: Money::new(r.unit_price), line_total: Money::new(r.line_total),
        })
    }
}

fn assemble(row: OrderRow, items: Vec<OrderItem>) -> Result<Order, StoreError> {
    Ok(Order {
        status: row.status.parse().map_err(|e| corrupt("order", row.id, e))?,
        id: row.id, user_id: row.user_id, subtotal: Money::new(row.subtotal), total: Money::new(row.total),
        payment_session_id: row.payment_session_id, payment_transaction_id: row.payment_transaction_id,
        created_at: row.created_at, updated_at: row.updated_at, items,
    })
}

fn conflict_on_unique(err: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    let unique = matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation());
    if unique { StoreError::Conflict(what()) } else { StoreError::Database(err) }
}

/// `%`, `_` and `\` in user search text match themselves.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.trim().chars() {
        if matches!(c, '%' | '_' | '\\') { pattern.push('\\'); }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn order_by(sort: ProductSort, direction: SortDirection) -> &'static str {
    match (sort, direction) {
        (ProductSort::CreatedAt, SortDirection::Asc) => "created_at ASC, id ASC",
        (ProductSort::CreatedAt, SortDirection::Desc) => "created_at DESC, id DESC",
        (ProductSort::Price, SortDirection::Asc) => "price ASC, id ASC",
        (ProductSort::Price, SortDirection::Desc) => "price DESC, id DESC",
        (ProductSort::Name, SortDirection::Asc) => "lower(name_en) ASC, id ASC",
        (ProductSort::Name, SortDirection::Desc) => "lower(name_en) DESC, id DESC",
        (ProductSort::Stock, SortDirection::Asc) => "stock ASC, id ASC",
        (ProductSort::Stock, SortDirection::Desc) => "stock DESC, id DESC",
    }
}

const CART_LINES_SQL: &str = "SELECT ci.product_id, ci.quantity, p.slug, p.name_en, p.name_es, p.price, p.image_urls, p.stock, p.active \
     FROM cart_items ci JOIN products p ON p.id = ci.product_id WHERE ci.cart_id = $1 ORDER BY ci.created_at, ci.id";

/// Same lines, locking the product rows in id order so concurrent finalizations cannot deadlock.
const CART_LINES_FOR_UPDATE_SQL: &str = "SELECT ci.product_id, ci.quantity, p.slug, p.name_en, p.name_es, p.price, p.image_urls, p.stock, p.active \
     FROM cart_items ci JOIN products p ON p.id = ci.product_id WHERE ci.cart_id = $1 ORDER BY p.id FOR UPDATE OF p";

#[derive(Clone, Debug)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn load_cart(&self, row: CartRow) -> Result<Cart, StoreError> {
        let lines = sqlx::query_as::<_, CartLineRow>(CART_LINES_SQL).bind(row.id).fetch_all(&self.pool).await?;
        Ok(Cart {
            id: row.id, user_id: row.user_id, created_at: row.created_at,
            items: lines.into_iter().map(CartLine::try_from).collect::<Result<_, _>>()?,
        })
    }

    async fn load_cart_for_user(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
        let row = sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE user_id = $1").bind(user_id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.load_cart(row).await?)),
            None => Ok(None),
        }
    }

    async fn with_items(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let item_rows = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY id")
            .bind(&ids[..]).fetch_all(&self.pool).await?;
        let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            let order_id = row.order_id;
            by_order.entry(order_id).or_default().push(OrderItem::try_from(row)?);
        }
        rows.into_iter().map(|r| {
            let items = by_order.remove(&r.id).unwrap_or_default();
            assemble(r, items)
        }).collect()
    }

    async fn insert_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<bool, StoreError> {
        let inserted = sqlx::query("INSERT INTO orders (id, user_id, status, subtotal, total, payment_session_id, payment_transaction_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (payment_session_id) DO NOTHING")
            .bind(order.id).bind(order.user_id).bind(order.status.as_str()).bind(order.subtotal.amount()).bind(order.total.amount())
            .bind(&order.payment_session_id).bind(&order.payment_transaction_id).bind(order.created_at).bind(order.updated_at)
            .execute(&mut **tx).await?;
        if inserted.rows_affected() == 0 { return Ok(false); }
        for item in order.items() {
            sqlx::query("INSERT INTO order_items (id, order_id, product_id, product_name, quantity, unit_price, line_total) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                .bind(item.id).bind(order.id).bind(item.product_id).bind(&item.product_name).bind(qty_to_db(item.quantity))
                .bind(item.unit_price.amount()).bind(item.line_total.amount())
                .execute(&mut **tx).await?;
        }
        Ok(true)
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>, StoreError> {
        const FILTER: &str = "WHERE ($1 OR active) AND ($2::uuid IS NULL OR category_id = $2) AND (NOT $4 OR featured) \
             AND ($3::text IS NULL OR name_en ILIKE $3 ESCAPE '\\' OR name_es ILIKE $3 ESCAPE '\\' OR slug ILIKE $3 ESCAPE '\\')";
        let pattern = query.search.as_deref().map(like_pattern);
        let order = order_by(query.sort, query.direction);
        let rows = sqlx::query_as::<_, ProductRow>(&format!("SELECT * FROM products {FILTER} ORDER BY {order} LIMIT $5 OFFSET $6"))
            .bind(query.include_inactive).bind(query.category_id).bind(&pattern).bind(query.featured_only)
            .bind(i64::from(query.page.limit)).bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM products {FILTER}"))
            .bind(query.include_inactive).bind(query.category_id).bind(&pattern).bind(query.featured_only)
            .fetch_one(&self.pool).await?;
        let products = rows.into_iter().map(Product::try_from).collect::<Result<_, _>>()?;
        Ok(Page::new(products, total.0, query.page))
    }

    async fn product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1").bind(id)
            .fetch_optional(&self.pool).await?.map(Product::try_from).transpose()
    }

    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>, StoreError> {
        sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE slug = $1").bind(slug)
            .fetch_optional(&self.pool).await?.map(Product::try_from).transpose()
    }

    async fn create_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        let p = Product::create(new)?;
        sqlx::query("INSERT INTO products (id, slug, name_en, name_es, description_en, description_es, price, compare_at_price, stock, active, featured, category_id, image_urls, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)")
            .bind(p.id).bind(p.slug.as_str()).bind(&p.name.en).bind(&p.name.es).bind(&p.description.en).bind(&p.description.es)
            .bind(p.price.amount()).bind(p.compare_at_price.map(|m| m.amount())).bind(stock_to_db(p.stock)).bind(p.active)
            .bind(p.featured).bind(p.category_id).bind(&p.image_urls).bind(p.created_at).bind(p.updated_at)
            .execute(&self.pool).await
            .map_err(|e| conflict_on_unique(e, || format!("product slug '{}'", p.slug)))?;
        Ok(p)
    }

    async fn update_product(&self, id: Uuid, patch: ProductPatch) -> Result<Option<Product>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await? else { return Ok(None) };
        let mut p = Product::try_from(row)?;
        p.apply(patch)?;
        sqlx::query("UPDATE products SET slug = $2, name_en = $3, name_es = $4, description_en = $5, description_es = $6, price = $7, compare_at_price = $8, stock = $9, active = $10, featured = $11, category_id = $12, image_urls = $13, updated_at = $14 WHERE id = $1")
            .bind(p.id).bind(p.slug.as_str()).bind(&p.name.en).bind(&p.name.es).bind(&p.description.en).bind(&p.description.es)
            .bind(p.price.amount()).bind(p.compare_at_price.map(|m| m.amount())).bind(stock_to_db(p.stock)).bind(p.active)
            .bind(p.featured).bind(p.category_id).bind(&p.image_urls).bind(p.updated_at)
            .execute(&mut *tx).await
            .map_err(|e| conflict_on_unique(e, || format!("product slug '{}'", p.slug)))?;
        tx.commit().await?;
        Ok(Some(p))
    }

    async fn deactivate_product(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE products SET active = FALSE, updated_at = NOW() WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn inventory(&self, low_stock_threshold: u32, limit: u32) -> Result<InventorySummary, StoreError> {
        let active_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE active")
            .fetch_one(&self.pool).await?;
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE active AND stock <= $1 ORDER BY stock ASC, id ASC LIMIT $2")
            .bind(stock_to_db(low_stock_threshold)).bind(i64::from(limit))
            .fetch_all(&self.pool).await?;
        let low_stock = rows.into_iter().map(Product::try_from).collect::<Result<_, _>>()?;
        Ok(InventorySummary { active_products, low_stock })
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn cart_for_user(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
        self.load_cart_for_user(user_id).await
    }

    async fn add_item(&self, user_id: Uuid, product_id: Uuid, quantity: Quantity) -> Result<Cart, StoreError> {
        let cart = sqlx::query_as::<_, CartRow>("INSERT INTO carts (id, user_id, created_at) VALUES ($1, $2, NOW()) ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id RETURNING *")
            .bind(Uuid::now_v7()).bind(user_id).fetch_one(&self.pool).await?;
        sqlx::query("INSERT INTO cart_items (id, cart_id, product_id, quantity, created_at) VALUES ($1, $2, $3, $4, NOW()) ON CONFLICT (cart_id, product_id) DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity")
            .bind(Uuid::now_v7()).bind(cart.id).bind(product_id).bind(qty_to_db(quantity))
            .execute(&self.pool).await?;
        self.load_cart(cart).await
    }

    async fn set_quantity(&self, user_id: Uuid, product_id: Uuid, quantity: Quantity) -> Result<Option<Cart>, StoreError> {
        let updated = sqlx::query("UPDATE cart_items ci SET quantity = $3 FROM carts c WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.product_id = $2")
            .bind(user_id).bind(product_id).bind(qty_to_db(quantity)).execute(&self.pool).await?;
        if updated.rows_affected() == 0 { return Ok(None); }
        self.load_cart_for_user(user_id).await
    }

    async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM cart_items ci USING carts c WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.product_id = $2")
            .bind(user_id).bind(product_id).execute(&self.pool).await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let deleted = sqlx::query("DELETE FROM cart_items ci USING carts c WHERE ci.cart_id = c.id AND c.user_id = $1")
            .bind(user_id).execute(&self.pool).await?;
        Ok(deleted.rows_affected())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn finalize_checkout(&self, completion: &CheckoutCompletion) -> Result<Finalization, StoreError> {
        let session_id = completion.payment.session_id.as_str();
        let mut tx = self.pool.begin().await?;

        // Serializes deliveries of the same session until commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))").bind(session_id).execute(&mut *tx).await?;

        let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE payment_session_id = $1")
            .bind(session_id).fetch_optional(&mut *tx).await?;
        if let Some((order_id,)) = existing {
            return Ok(Finalization::AlreadyFinalized { order_id });
        }

        let Some(cart) = sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE id = $1 FOR UPDATE")
            .bind(completion.cart_id).fetch_optional(&mut *tx).await? else { return Ok(Finalization::CartMissing) };
        if cart.user_id != completion.user_id {
            return Ok(Finalization::CartOwnerMismatch { owner: cart.user_id });
        }
        let lines = sqlx::query_as::<_, CartLineRow>(CART_LINES_FOR_UPDATE_SQL).bind(cart.id).fetch_all(&mut *tx).await?;
        let cart = Cart {
            id: cart.id, user_id: cart.user_id, created_at: cart.created_at,
            items: lines.into_iter().map(CartLine::try_from).collect::<Result<_, _>>()?,
        };
        if cart.is_empty() { return Ok(Finalization::CartEmpty); }

        let order = Order::from_cart(&cart, completion.payment.clone()).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if !Self::insert_order(&mut tx, &order).await? {
            tx.rollback().await?;
            warn!(session_id, "order insert hit the session unique constraint");
            let order_id = sqlx::query_as::<_, (Uuid,)>("SELECT id FROM orders WHERE payment_session_id = $1")
                .bind(session_id).fetch_one(&self.pool).await?.0;
            return Ok(Finalization::AlreadyFinalized { order_id });
        }

        let mut stock = Vec::with_capacity(cart.line_count());
        for line in cart.items() {
            sqlx::query("UPDATE products SET stock = GREATEST(stock - $2, 0), updated_at = NOW() WHERE id = $1")
                .bind(line.product_id).bind(qty_to_db(line.quantity)).execute(&mut *tx).await?;
            stock.push(StockChange {
                product_id: line.product_id,
                adjustment: StockAdjustment::compute(line.product.stock, line.quantity),
            });
        }

        let cleared = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart.id).execute(&mut *tx).await?;
        tx.commit().await?;
        debug!(order_id = %order.id, lines_cleared = cleared.rows_affected(), "checkout finalized");
        Ok(Finalization::Created { order, stock })
    }

    async fn order_by_payment_session(&self, session_id: &str) -> Result<Option<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE payment_session_id = $1")
            .bind(session_id).fetch_all(&self.pool).await?;
        Ok(self.with_items(rows).await?.into_iter().next())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_all(&self.pool).await?;
        Ok(self.with_items(rows).await?.into_iter().next())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(user_id).fetch_all(&self.pool).await?;
        self.with_items(rows).await
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>, StoreError> {
        let status = query.status.map(|s| s.as_str());
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3")
            .bind(status).bind(i64::from(query.page.limit)).bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE ($1::text IS NULL OR status = $1)")
            .bind(status).fetch_one(&self.pool).await?;
        Ok(Page::new(self.with_items(rows).await?, total.0, query.page))
    }

    async fn update_status(&self, id: Uuid, expected: OrderStatus, next: OrderStatus) -> Result<Option<Order>, StoreError> {
        let updated = sqlx::query("UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(id).bind(expected.as_str()).bind(next.as_str()).execute(&self.pool).await?;
        if updated.rows_affected() == 0 { return Ok(None); }
        self.order(id).await
    }

    async fn totals(&self) -> Result<OrderTotals, StoreError> {
        let (orders, paid_revenue): (i64, Decimal) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(total) FILTER (WHERE status = 'PAID'), 0) FROM orders",
        )
        .fetch_one(&self.pool).await?;
        Ok(OrderTotals { orders, paid_revenue: Money::new(paid_revenue) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::aggregates::PaymentReference;
    use crate::store::PageRequest;
    use crate::test::db::TestDb;

    macro_rules! test_db {
        () => {
            match TestDb::new().await {
                Some(db) => db,
                None => return,
            }
        };
    }

    async fn seed(store: &PgStore, slug: &str, price: Decimal, stock: u32) -> Product {
        store.create_product(NewProduct {
            slug: Slug::new(slug).unwrap(), name: LocalizedText::new(slug, None), description: LocalizedText::default(),
            price: Money::new(price), compare_at_price: None, stock, featured: false, category_id: None, image_urls: vec![],
        }).await.unwrap()
    }

    fn completion(cart: &Cart, session: &str) -> CheckoutCompletion {
        CheckoutCompletion {
            payment: PaymentReference { session_id: session.into(), transaction_id: Some("pi_1".into()) },
            user_id: cart.user_id,
            cart_id: cart.id,
        }
    }

    async fn order_count(db: &TestDb) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM orders").fetch_one(&db.pool).await.unwrap()
    }

    async fn stock_of(store: &PgStore, id: Uuid) -> u32 {
        store.product(id).await.unwrap().unwrap().stock
    }

    #[tokio::test]
    async fn test_finalize_is_once_per_session() {
        let db = test_db!();
        let store = db.store();
        let p = seed(&store, "trail-runner", dec!(89.99), 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(2).unwrap()).await.unwrap();

        let Finalization::Created { order, stock } = store.finalize_checkout(&completion(&cart, "cs_1")).await.unwrap() else {
            panic!("expected an order");
        };
        assert_eq!(stock, vec![StockChange { product_id: p.id, adjustment: StockAdjustment { before: 5, after: 3, shortfall: 0 } }]);
        let second = store.finalize_checkout(&completion(&cart, "cs_1")).await.unwrap();
        assert_eq!(second, Finalization::AlreadyFinalized { order_id: order.id });

        let stored = store.order_by_payment_session("cs_1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.total.amount(), dec!(179.98));
        assert_eq!(stored.payment_transaction_id.as_deref(), Some("pi_1"));
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.items[0].unit_price.amount(), dec!(89.99));
        assert_eq!(stored.items[0].quantity.value(), 2);

        assert_eq!(order_count(&db).await, 1);
        assert_eq!(stock_of(&store, p.id).await, 3);
        let cart_after = store.cart_for_user(cart.user_id).await.unwrap().unwrap();
        assert_eq!(cart_after.id, cart.id);
        assert!(cart_after.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_create_one_order() {
        let db = test_db!();
        let store = Arc::new(db.store());
        let p = seed(&store, "mug", dec!(12), 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(2).unwrap()).await.unwrap();

        let handles: Vec<_> = (0..8).map(|_| {
            let store = Arc::clone(&store);
            let completion = completion(&cart, "cs_race");
            tokio::spawn(async move { store.finalize_checkout(&completion).await.unwrap() })
        }).collect();
        let mut created = 0;
        for h in handles {
            match h.await.unwrap() {
                Finalization::Created { .. } => created += 1,
                Finalization::AlreadyFinalized { .. } => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(order_count(&db).await, 1);
        assert_eq!(stock_of(&store, p.id).await, 3);
    }

    #[tokio::test]
    async fn test_shortfall_clamps_stock_at_zero() {
        let db = test_db!();
        let store = db.store();
        let p = seed(&store, "lamp", dec!(40), 1).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(3).unwrap()).await.unwrap();

        let Finalization::Created { order, stock } = store.finalize_checkout(&completion(&cart, "cs_short")).await.unwrap() else {
            panic!("expected an order");
        };
        assert_eq!(order.items[0].quantity.value(), 3);
        assert_eq!(stock[0].adjustment, StockAdjustment { before: 1, after: 0, shortfall: 2 });
        assert_eq!(stock_of(&store, p.id).await, 0);
    }

    #[tokio::test]
    async fn test_lines_are_priced_at_finalization() {
        let db = test_db!();
        let store = db.store();
        let p = seed(&store, "tote", dec!(12.50), 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(2).unwrap()).await.unwrap();
        let patch = ProductPatch { price: Some(Money::new(dec!(20.00))), ..ProductPatch::default() };
        store.update_product(p.id, patch).await.unwrap();

        store.finalize_checkout(&completion(&cart, "cs_repriced")).await.unwrap();
        let order = store.order_by_payment_session("cs_repriced").await.unwrap().unwrap();
        assert_eq!(order.items[0].unit_price.amount(), dec!(20.00));
        assert_eq!(order.total.amount(), dec!(40.00));
    }

    #[tokio::test]
    async fn test_failed_finalization_leaves_nothing_behind() {
        let db = test_db!();
        let store = db.store();
        let p = seed(&store, "mug", dec!(12), 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(2).unwrap()).await.unwrap();

        // Clearing the cart is the last write before commit.
        sqlx::query("CREATE FUNCTION refuse_delete() RETURNS trigger AS $$ BEGIN RAISE EXCEPTION 'cart is locked'; END $$ LANGUAGE plpgsql")
            .execute(&db.pool).await.unwrap();
        sqlx::query("CREATE TRIGGER refuse_delete BEFORE DELETE ON cart_items FOR EACH ROW EXECUTE FUNCTION refuse_delete()")
            .execute(&db.pool).await.unwrap();

        let err = store.finalize_checkout(&completion(&cart, "cs_fail")).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(order_count(&db).await, 0);
        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items").fetch_one(&db.pool).await.unwrap();
        assert_eq!(items, 0);
        assert_eq!(stock_of(&store, p.id).await, 5);
        assert_eq!(store.cart_for_user(cart.user_id).await.unwrap().unwrap().unit_count(), 2);

        sqlx::query("DROP TRIGGER refuse_delete ON cart_items").execute(&db.pool).await.unwrap();
        let retried = store.finalize_checkout(&completion(&cart, "cs_fail")).await.unwrap();
        assert!(matches!(retried, Finalization::Created { .. }));
        assert_eq!(stock_of(&store, p.id).await, 3);
    }

    #[tokio::test]
    async fn test_finalize_rejects_foreign_and_missing_carts() {
        let db = test_db!();
        let store = db.store();
        let p = seed(&store, "mug", dec!(12), 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::ONE).await.unwrap();

        let mut c = completion(&cart, "cs_foreign");
        c.user_id = Uuid::now_v7();
        assert_eq!(store.finalize_checkout(&c).await.unwrap(), Finalization::CartOwnerMismatch { owner: cart.user_id });
        c.cart_id = Uuid::now_v7();
        assert_eq!(store.finalize_checkout(&c).await.unwrap(), Finalization::CartMissing);

        store.clear_cart(cart.user_id).await.unwrap();
        assert_eq!(store.finalize_checkout(&completion(&cart, "cs_empty")).await.unwrap(), Finalization::CartEmpty);
        assert_eq!(order_count(&db).await, 0);
        assert_eq!(stock_of(&store, p.id).await, 5);
    }

    #[tokio::test]
    async fn test_update_status_is_compare_and_set() {
        let db = test_db!();
        let store = db.store();
        let p = seed(&store, "mug", dec!(12), 5).await;
        let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::ONE).await.unwrap();
        let Finalization::Created { order, .. } = store.finalize_checkout(&completion(&cart, "cs_cas")).await.unwrap() else {
            panic!("expected an order");
        };
        let updated = store.update_status(order.id, OrderStatus::Paid, OrderStatus::Processing).await.unwrap();
        assert_eq!(updated.map(|o| o.status), Some(OrderStatus::Processing));
        assert!(store.update_status(order.id, OrderStatus::Paid, OrderStatus::Shipped).await.unwrap().is_none());

        let page = store.list_orders(&OrderQuery { page: PageRequest::default(), status: Some(OrderStatus::Processing) }).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(store.orders_for_user(cart.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_product_queries() {
        let db = test_db!();
        let store = db.store();
        seed(&store, "canvas-tote", dec!(24.50), 10).await;
        let lamp = seed(&store, "field-lamp", dec!(40), 3).await;
        let mug = store.create_product(NewProduct {
            slug: Slug::new("mug-50").unwrap(), name: LocalizedText::new("50% Off Mug", Some("Taza".into())),
            description: LocalizedText::default(), price: Money::new(dec!(9.99)), compare_at_price: None, stock: 0,
            featured: true, category_id: None, image_urls: vec![],
        }).await.unwrap();

        let query = |f: fn(&mut ProductQuery)| {
            let mut q = ProductQuery::default();
            f(&mut q);
            q
        };
        let slugs = |page: Page<Product>| page.data.into_iter().map(|p| p.slug.to_string()).collect::<Vec<_>>();

        let page = store.list_products(&query(|q| q.search = Some("_".into()))).await.unwrap();
        assert_eq!(page.total, 0);
        let page = store.list_products(&query(|q| q.search = Some("50%".into()))).await.unwrap();
        assert_eq!(slugs(page), ["mug-50"]);
        let page = store.list_products(&query(|q| q.search = Some("taza".into()))).await.unwrap();
        assert_eq!(page.total, 1);

        let page = store.list_products(&query(|q| q.featured_only = true)).await.unwrap();
        assert_eq!(slugs(page), ["mug-50"]);
        let page = store.list_products(&query(|q| { q.sort = ProductSort::Price; q.direction = SortDirection::Asc; })).await.unwrap();
        assert_eq!(slugs(page), ["mug-50", "canvas-tote", "field-lamp"]);

        store.deactivate_product(mug.id).await.unwrap();
        assert_eq!(store.list_products(&ProductQuery::default()).await.unwrap().total, 2);
        assert_eq!(store.list_products(&query(|q| q.include_inactive = true)).await.unwrap().total, 3);

        let inventory = store.inventory(5, 10).await.unwrap();
        assert_eq!(inventory.active_products, 2);
        assert_eq!(inventory.low_stock.iter().map(|p| p.id).collect::<Vec<_>>(), [lamp.id]);
    }

    #[tokio::test]
    async fn test_totals_count_paid_revenue() {
        let db = test_db!();
        let store = db.store();
        let p = seed(&store, "mug", dec!(12.25), 10).await;
        let mut ids = Vec::new();
        for session in ["cs_a", "cs_b"] {
            let cart = store.add_item(Uuid::now_v7(), p.id, Quantity::new(2).unwrap()).await.unwrap();
            let Finalization::Created { order, .. } = store.finalize_checkout(&completion(&cart, session)).await.unwrap() else {
                panic!("expected an order");
            };
            ids.push(order.id);
        }
        store.update_status(ids[1], OrderStatus::Paid, OrderStatus::Refunded).await.unwrap();

        let totals = store.totals().await.unwrap();
        assert_eq!(totals.orders, 2);
        assert_eq!(totals.paid_revenue.amount(), dec!(24.50));
    }
}
