//! Cart operations for the authenticated caller.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::api::auth::AuthUser;
use crate::api::error::ApiError;
use crate::api::extract::{JsonBody, PathParam};
use crate::api::AppState;
use crate::domain::aggregates::CartSummary;
use crate::domain::value_objects::Quantity;

fn one() -> u32 { 1 }

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 999))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1, max = 999))]
    pub quantity: u32,
}

fn quantity(value: u32) -> Result<Quantity, ApiError> {
    Quantity::new(value).map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> Result<Json<CartSummary>, ApiError> {
    Ok(Json(state.carts.cart_for_user(user.id).await?.into()))
}

/// Stock is checked against the resulting line quantity; it is advisory until payment.
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(body): JsonBody<AddItemRequest>,
) -> Result<Json<CartSummary>, ApiError> {
    body.validate()?;
    let requested = quantity(body.quantity)?;
    let product = state.catalog.product(body.product_id).await?.ok_or(ApiError::NotFound("Product not found"))?;

    let in_cart = state
        .carts
        .cart_for_user(user.id)
        .await?
        .and_then(|cart| cart.items.into_iter().find(|l| l.product_id == product.id))
        .map(|l| l.quantity);
    let resulting = in_cart.map_or(requested, |q| q.saturating_add(requested));
    product.ensure_available(resulting)?;

    let cart = state.carts.add_item(user.id, product.id, requested).await?;
    tracing::debug!(user_id = %user.id, product_id = %product.id, quantity = %resulting, "cart line added");
    Ok(Json(Some(cart).into()))
}

pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(product_id): PathParam<Uuid>,
    JsonBody(body): JsonBody<UpdateQuantityRequest>,
) -> Result<Json<CartSummary>, ApiError> {
    body.validate()?;
    let requested = quantity(body.quantity)?;
    let product = state.catalog.product(product_id).await?.ok_or(ApiError::NotFound("Product not found"))?;
    product.ensure_available(requested)?;
    let cart = state
        .carts
        .set_quantity(user.id, product_id, requested)
        .await?
        .ok_or(ApiError::NotFound("Cart item not found"))?;
    Ok(Json(Some(cart).into()))
}

pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(product_id): PathParam<Uuid>,
) -> Result<Json<CartSummary>, ApiError> {
    if !state.carts.remove_item(user.id, product_id).await? {
        return Err(ApiError::NotFound("Cart item not found"));
    }
    Ok(Json(state.carts.cart_for_user(user.id).await?.into()))
}

pub async fn clear_cart(State(state): State<AppState>, user: AuthUser) -> Result<Json<Value>, ApiError> {
    let removed = state.carts.clear_cart(user.id).await?;
    Ok(Json(json!({ "message": "Cart cleared", "removed": removed })))
}
