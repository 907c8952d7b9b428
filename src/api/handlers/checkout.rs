use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::api::auth::AuthUser;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::payments::{HostedSession, SIGNATURE_HEADER};

pub async fn create_session(State(state): State<AppState>, user: AuthUser) -> Result<Json<HostedSession>, ApiError> {
    let session = state.checkout.initiate(user.id, Some(user.email.as_str())).await?;
    Ok(Json(session))
}

/// Signature is checked over the raw body, so this handler must not parse JSON first.
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<Value>, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = state.finalizer.handle(&body, signature).await?;
    tracing::debug!(?outcome, "webhook acknowledged");
    Ok(Json(json!({ "received": true })))
}
