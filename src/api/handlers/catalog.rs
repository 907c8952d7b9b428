//! Public catalog reads.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::extract::{PathParam, QueryParams};
use crate::api::AppState;
use crate::domain::aggregates::Product;
use crate::domain::value_objects::{Locale, Money};
use crate::store::{Page, PageRequest, ProductQuery, ProductSort, SortDirection};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub category: Option<Uuid>,
    pub featured: Option<bool>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LangParam {
    pub lang: Option<String>,
}

/// A product with its text resolved to one language.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub compare_at_price: Option<Money>,
    pub stock: u32,
    pub in_stock: bool,
    pub featured: bool,
    pub category_id: Option<Uuid>,
    pub image_urls: Vec<String>,
}

impl ProductView {
    pub fn localized(product: Product, locale: Locale) -> Self {
        Self {
            name: product.name.resolve(locale).to_string(),
            description: product.description.resolve(locale).to_string(),
            in_stock: product.is_in_stock(),
            id: product.id,
            slug: product.slug.to_string(),
            price: product.price,
            compare_at_price: product.compare_at_price,
            stock: product.stock,
            featured: product.featured,
            category_id: product.category_id,
            image_urls: product.image_urls,
        }
    }
}

fn locale(lang: Option<&str>) -> Locale {
    lang.and_then(|l| l.parse().ok()).unwrap_or_default()
}

pub(crate) fn parse_or_default<T>(value: Option<&str>) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = String> + Default,
{
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => v.parse().map_err(ApiError::BadRequest),
        None => Ok(T::default()),
    }
}

pub async fn list_products(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ListParams>,
) -> Result<Json<Page<ProductView>>, ApiError> {
    let query = ProductQuery {
        page: PageRequest::new(params.page, params.limit),
        search: params.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        category_id: params.category,
        featured_only: params.featured.unwrap_or(false),
        include_inactive: false,
        sort: parse_or_default::<ProductSort>(params.sort.as_deref())?,
        direction: parse_or_default::<SortDirection>(params.order.as_deref())?,
    };
    let locale = locale(params.lang.as_deref());
    let page = state.catalog.list_products(&query).await?;
    Ok(Json(page.map(|p| ProductView::localized(p, locale))))
}

pub async fn get_product(
    State(state): State<AppState>,
    PathParam(slug): PathParam<String>,
    QueryParams(params): QueryParams<LangParam>,
) -> Result<Json<ProductView>, ApiError> {
    let product = state
        .catalog
        .product_by_slug(&slug.to_lowercase())
        .await?
        .filter(|p| p.active)
        .ok_or(ApiError::NotFound("Product not found"))?;
    Ok(Json(ProductView::localized(product, locale(params.lang.as_deref()))))
}
