//! HTTP surface: shared state, routing and middleware.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::payments::{PaymentGateway, WebhookVerifier};
use crate::publisher::EventPublisher;
use crate::services::{CheckoutService, OrderAdmin, OrderFinalizer, RedirectUrls};
use crate::store::{CartStore, CatalogStore, OrderStore, Store};

pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;

use handlers::{admin, cart, catalog, checkout, orders};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogStore>,
    pub carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderStore>,
    pub checkout: Arc<CheckoutService>,
    pub finalizer: Arc<OrderFinalizer>,
    pub order_admin: Arc<OrderAdmin>,
    pub tokens: Arc<auth::TokenKeys>,
}

impl AppState {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
        config: &Config,
    ) -> Self {
        let catalog: Arc<dyn CatalogStore> = store.clone();
        let carts: Arc<dyn CartStore> = store.clone();
        let orders: Arc<dyn OrderStore> = store;
        let verifier = WebhookVerifier::new(config.stripe.webhook_secret.clone(), config.stripe.webhook_tolerance_secs);
        Self {
            checkout: Arc::new(CheckoutService::new(
                carts.clone(),
                gateway,
                config.stripe.currency.clone(),
                RedirectUrls::for_frontend(&config.frontend_url),
            )),
            finalizer: Arc::new(OrderFinalizer::new(orders.clone(), verifier, events.clone())),
            order_admin: Arc::new(OrderAdmin::new(orders.clone(), config.order_status_policy, events)),
            tokens: Arc::new(auth::TokenKeys::new(config.jwt_secret.as_bytes())),
            catalog,
            carts,
            orders,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/products", get(catalog::list_products))
        .route("/products/:slug", get(catalog::get_product))
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/cart/items", post(cart::add_item))
        .route("/cart/items/:product_id", patch(cart::update_item).delete(cart::remove_item))
        .route("/stripe/checkout", post(checkout::create_session))
        .route("/stripe/webhook", post(checkout::webhook))
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/products", get(admin::list_products).post(admin::create_product))
        .route("/admin/products/:id", patch(admin::update_product).delete(admin::deactivate_product))
        .route("/admin/orders", get(admin::list_orders))
        .route("/admin/orders/:id/status", patch(admin::update_order_status));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "storefront", "timestamp": Utc::now() }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Route not found" })))
}
