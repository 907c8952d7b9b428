//! HTTP error mapping. Every error body is `{"error": "<message>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use validator::ValidationErrors;

use crate::domain::aggregates::{OrderError, ProductError};
use crate::domain::value_objects::SlugError;
use crate::services::{CheckoutError, StatusChangeError, WebhookError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => Self::Conflict(format!("{what} already exists")),
            StoreError::Invalid(e) => e.into(),
            other => {
                error!(error = %other, "store failure");
                Self::Internal
            }
        }
    }
}

impl From<ProductError> for ApiError {
    fn from(err: ProductError) -> Self {
        match err {
            ProductError::Inactive => Self::NotFound("Product not found"),
            ProductError::InsufficientStock { .. } => Self::BadRequest("Insufficient stock".into()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<SlugError> for ApiError {
    fn from(err: SlugError) -> Self { Self::BadRequest(err.to_string()) }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self { Self::BadRequest(err.to_string()) }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::EmptyCart => Self::BadRequest("Cart is empty".into()),
            CheckoutError::Initiation(e) => {
                error!(error = %e, "checkout session could not be created");
                Self::BadGateway("Payment provider unavailable".into())
            }
            CheckoutError::Pricing(e) => {
                error!(error = %e, "cart could not be priced");
                Self::Internal
            }
            CheckoutError::Store(e) => e.into(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidSignature(_) => Self::BadRequest("Webhook signature verification failed".into()),
            WebhookError::MalformedPayload(_) => Self::BadRequest("Malformed webhook payload".into()),
        }
    }
}

impl From<StatusChangeError> for ApiError {
    fn from(err: StatusChangeError) -> Self {
        match err {
            StatusChangeError::NotFound => Self::NotFound("Order not found"),
            StatusChangeError::Rejected(e) => e.into(),
            StatusChangeError::Conflict => Self::Conflict(err.to_string()),
            StatusChangeError::Store(e) => e.into(),
        }
    }
}
