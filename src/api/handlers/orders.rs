//! Order history for the authenticated caller.

use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::api::error::ApiError;
use crate::api::extract::PathParam;
use crate::api::AppState;
use crate::domain::aggregates::Order;

pub async fn list_orders(State(state): State<AppState>, user: AuthUser) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders.orders_for_user(user.id).await?))
}

/// Other users' orders are reported as missing.
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> Result<Json<Order>, ApiError> {
    state
        .orders
        .order(id)
        .await?
        .filter(|o| o.user_id == user.id)
        .map(Json)
        .ok_or(ApiError::NotFound("Order not found"))
}
