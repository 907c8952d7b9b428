//! Catalog and order administration. Every handler requires [`AdminUser`].

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::api::auth::AdminUser;
use crate::api::error::ApiError;
use crate::api::extract::{JsonBody, PathParam, QueryParams};
use crate::api::handlers::catalog::parse_or_default;
use crate::api::AppState;
use crate::domain::aggregates::{NewProduct, Order, OrderStatus, Product, ProductPatch};
use crate::domain::value_objects::{LocalizedText, Money, Slug};
use crate::store::{InventorySummary, OrderQuery, OrderTotals, Page, PageRequest, ProductQuery, ProductSort, SortDirection};

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct AdminListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

/// Active products at or below this stock level are reported as running low.
pub const LOW_STOCK_THRESHOLD: u32 = 5;
const STATS_LIST_LIMIT: u32 = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_products: i64,
    pub total_orders: i64,
    pub total_revenue: Money,
    pub recent_orders: Vec<Order>,
    pub low_stock: Vec<Product>,
}

impl DashboardStats {
    fn new(inventory: InventorySummary, totals: OrderTotals, recent_orders: Vec<Order>) -> Self {
        Self {
            total_products: inventory.active_products,
            total_orders: totals.orders,
            total_revenue: totals.paid_revenue,
            recent_orders,
            low_stock: inventory.low_stock,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub name_es: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    pub description_es: Option<String>,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub is_featured: bool,
}

impl CreateProductRequest {
    fn into_new_product(self) -> Result<NewProduct, ApiError> {
        let slug = match self.slug.as_deref() {
            Some(slug) => Slug::new(slug)?,
            None => Slug::from_name(&self.name)?,
        };
        Ok(NewProduct {
            slug,
            name: LocalizedText::new(self.name, self.name_es),
            description: LocalizedText::new(self.description, self.description_es),
            price: Money::new(self.price),
            compare_at_price: self.compare_price.map(Money::new),
            stock: self.stock,
            featured: self.is_featured,
            category_id: self.category_id,
            image_urls: self.image_urls,
        })
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub name_es: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub description_es: Option<String>,
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "double_option")]
    pub compare_price: Option<Option<Decimal>>,
    pub stock: Option<u32>,
    pub image_urls: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_id: Option<Option<Uuid>>,
    pub is_featured: Option<bool>,
    pub is_active: Option<bool>,
}

impl UpdateProductRequest {
    /// Translations only change together with, or on top of, the current text.
    fn into_patch(self, current: &Product) -> Result<ProductPatch, ApiError> {
        let text = |en: Option<String>, es: Option<String>, base: &LocalizedText| match (en, es) {
            (None, None) => None,
            (en, es) => Some(LocalizedText::new(en.unwrap_or_else(|| base.en.clone()), es.or_else(|| base.es.clone()))),
        };
        Ok(ProductPatch {
            slug: self.slug.as_deref().map(Slug::new).transpose()?,
            name: text(self.name, self.name_es, &current.name),
            description: text(self.description, self.description_es, &current.description),
            price: self.price.map(Money::new),
            compare_at_price: self.compare_price.map(|p| p.map(Money::new)),
            stock: self.stock,
            active: self.is_active,
            featured: self.is_featured,
            category_id: self.category_id,
            image_urls: self.image_urls,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

pub async fn stats(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<DashboardStats>, ApiError> {
    let inventory = state.catalog.inventory(LOW_STOCK_THRESHOLD, STATS_LIST_LIMIT).await?;
    let totals = state.orders.totals().await?;
    let recent = state.orders.list_orders(&OrderQuery { page: PageRequest::new(Some(1), Some(STATS_LIST_LIMIT)), status: None }).await?;
    Ok(Json(DashboardStats::new(inventory, totals, recent.data)))
}

pub async fn list_products(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(params): QueryParams<AdminListParams>,
) -> Result<Json<Page<Product>>, ApiError> {
    let query = ProductQuery {
        page: PageRequest::new(params.page, params.limit),
        search: params.search.filter(|s| !s.trim().is_empty()),
        category_id: None,
        featured_only: false,
        include_inactive: true,
        sort: parse_or_default::<ProductSort>(params.sort.as_deref())?,
        direction: parse_or_default::<SortDirection>(params.order.as_deref())?,
    };
    Ok(Json(state.catalog.list_products(&query).await?))
}

pub async fn create_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    JsonBody(body): JsonBody<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    body.validate()?;
    let product = state.catalog.create_product(body.into_new_product()?).await?;
    info!(admin = %admin.id, product_id = %product.id, slug = %product.slug, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    PathParam(id): PathParam<Uuid>,
    JsonBody(body): JsonBody<UpdateProductRequest>,
) -> Result<Json<Product>, ApiError> {
    body.validate()?;
    let current = state.catalog.product(id).await?.ok_or(ApiError::NotFound("Product not found"))?;
    let patch = body.into_patch(&current)?;
    let product = state.catalog.update_product(id, patch).await?.ok_or(ApiError::NotFound("Product not found"))?;
    info!(admin = %admin.id, product_id = %id, "product updated");
    Ok(Json(product))
}

/// Soft delete: the product stays referenced by carts and past orders.
pub async fn deactivate_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    PathParam(id): PathParam<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if !state.catalog.deactivate_product(id).await? {
        return Err(ApiError::NotFound("Product not found"));
    }
    info!(admin = %admin.id, product_id = %id, "product deactivated");
    Ok(Json(json!({ "message": "Product deactivated" })))
}

pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(params): QueryParams<AdminListParams>,
) -> Result<Json<Page<Order>>, ApiError> {
    let status = params.status.as_deref().filter(|s| !s.is_empty()).map(str::parse::<OrderStatus>).transpose()?;
    let query = OrderQuery { page: PageRequest::new(params.page, params.limit), status };
    Ok(Json(state.orders.list_orders(&query).await?))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    PathParam(id): PathParam<Uuid>,
    JsonBody(body): JsonBody<StatusUpdateRequest>,
) -> Result<Json<Order>, ApiError> {
    let next: OrderStatus = body.status.parse()?;
    let order = state.order_admin.change_status(id, next).await?;
    info!(admin = %admin.id, order_id = %id, status = %order.status, "order status updated by admin");
    Ok(Json(order))
}
