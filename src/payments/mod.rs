//! Hosted payment sessions: the outbound gateway port and the inbound webhook.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod stripe;
pub mod webhook;

pub use stripe::StripeGateway;
pub use webhook::{CompletedSession, PaymentEvent, SignatureError, WebhookVerifier, SIGNATURE_HEADER};

/// Metadata keys attached to every session and echoed back by the completion webhook.
pub const METADATA_USER_ID: &str = "userId";
pub const METADATA_CART_ID: &str = "cartId";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionLineItem {
    pub name: String,
    pub image_url: Option<String>,
    /// Unit price in minor currency units.
    pub unit_amount: i64,
    pub quantity: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionMetadata {
    pub user_id: Uuid,
    pub cart_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRequest {
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub metadata: SessionMetadata,
}

impl SessionRequest {
    pub fn amount_total(&self) -> i64 {
        self.line_items.iter().map(|l| l.unit_amount * i64::from(l.quantity)).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedSession {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected payment provider response: {0}")]
    MalformedResponse(String),
}

/// Creates hosted checkout sessions with the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<HostedSession, GatewayError>;
}
