//! Inbound payment webhooks: `Stripe-Signature` verification and event parsing.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::{METADATA_CART_ID, METADATA_USER_ID};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,
    #[error("malformed signature header")]
    MalformedHeader,
    /// `skew_secs` is the distance from now in either direction.
    #[error("signature timestamp outside tolerance ({skew_secs}s)")]
    StaleTimestamp { skew_secs: u64 },
    #[error("signature mismatch")]
    Mismatch,
    #[error("webhook secret is unusable")]
    InvalidSecret,
}

/// Checks that a payload was signed with the shared webhook secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookVerifier").field("tolerance_secs", &self.tolerance_secs).finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self { secret: secret.into(), tolerance_secs }
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    /// Header format is `t=<unix>,v1=<hex>[,v1=<hex>...]`; any matching `v1` entry is accepted.
    pub fn verify_at(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<(), SignatureError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(SignatureError::MissingHeader)?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
        if candidates.is_empty() {
            return Err(SignatureError::MalformedHeader);
        }

        let skew_secs = now.abs_diff(timestamp);
        if skew_secs > self.tolerance_secs.unsigned_abs() {
            return Err(SignatureError::StaleTimestamp { skew_secs });
        }

        for candidate in candidates {
            let Ok(expected) = hex::decode(candidate) else { continue };
            if self.mac(timestamp, payload)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(SignatureError::Mismatch)
    }

    /// Hex signature over `<timestamp>.<payload>`.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
        Ok(hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes()))
    }

    /// A complete header value, as the provider would send it.
    pub fn header_for(&self, timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
        Ok(format!("t={timestamp},v1={}", self.sign(timestamp, payload)?))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: Value,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    payment_intent: Option<Value>,
    #[serde(default)]
    payment_status: Option<String>,
}

/// A checkout session whose payment has been captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedSession {
    pub session_id: String,
    pub payment_transaction_id: Option<String>,
    pub user_id: Option<String>,
    pub cart_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEvent {
    CheckoutPaid(CompletedSession),
    /// Completed with a delayed payment method; `async_payment_succeeded` follows once funds arrive.
    CheckoutAwaitingPayment { session_id: String },
    Other { event_type: String },
}

impl PaymentEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        match envelope.event_type.as_str() {
            CHECKOUT_COMPLETED | ASYNC_PAYMENT_SUCCEEDED => {
                let session: SessionObject = serde_json::from_value(envelope.data.object)?;
                let captured = envelope.event_type == ASYNC_PAYMENT_SUCCEEDED
                    || matches!(session.payment_status.as_deref(), None | Some("paid" | "no_payment_required"));
                if !captured {
                    return Ok(Self::CheckoutAwaitingPayment { session_id: session.id });
                }
                let mut metadata = session.metadata.unwrap_or_default();
                Ok(Self::CheckoutPaid(CompletedSession {
                    payment_transaction_id: session.payment_intent.as_ref().and_then(intent_id),
                    user_id: metadata.remove(METADATA_USER_ID),
                    cart_id: metadata.remove(METADATA_CART_ID),
                    session_id: session.id,
                }))
            }
            _ => Ok(Self::Other { event_type: envelope.event_type }),
        }
    }
}

/// `payment_intent` is an id, or the full object when expanded.
fn intent_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
