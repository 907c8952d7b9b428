//! Webhook-driven order finalization.
//!
//! Every verified delivery is acknowledged, whatever happens afterwards, so the
//! provider does not retry deliveries that can never succeed. Redelivery of an
//! already finalized session is detected by the store and changes nothing.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::PaymentReference;
use crate::domain::events::DomainEvent;
use crate::payments::{CompletedSession, PaymentEvent, SignatureError, WebhookVerifier};
use crate::publisher::EventPublisher;
use crate::store::{CheckoutCompletion, Finalization, OrderStore};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook signature verification failed: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// What a verified delivery led to. All variants are acknowledged to the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Finalized { order_id: Uuid },
    Duplicate { order_id: Uuid },
    Ignored { reason: String },
    /// The store failed after payment was captured; needs manual reconciliation.
    Failed,
}

pub struct OrderFinalizer {
    orders: Arc<dyn OrderStore>,
    verifier: WebhookVerifier,
    events: Arc<dyn EventPublisher>,
}

impl OrderFinalizer {
    pub fn new(orders: Arc<dyn OrderStore>, verifier: WebhookVerifier, events: Arc<dyn EventPublisher>) -> Self {
        Self { orders, verifier, events }
    }

    #[instrument(skip_all, fields(bytes = payload.len()))]
    pub async fn handle(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookOutcome, WebhookError> {
        if let Err(e) = self.verifier.verify(payload, signature) {
            warn!(error = %e, "rejected webhook delivery");
            return Err(e.into());
        }
        match PaymentEvent::parse(payload)? {
            PaymentEvent::CheckoutPaid(session) => Ok(self.finalize(session).await),
            PaymentEvent::CheckoutAwaitingPayment { session_id } => {
                info!(%session_id, "checkout completed, payment still pending");
                Ok(WebhookOutcome::Ignored { reason: "payment not captured yet".into() })
            }
            PaymentEvent::Other { event_type } => {
                debug!(%event_type, "ignoring webhook event");
                Ok(WebhookOutcome::Ignored { reason: format!("unhandled event type {event_type}") })
            }
        }
    }

    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub async fn finalize(&self, session: CompletedSession) -> WebhookOutcome {
        let Some(completion) = correlate(&session) else {
            error!(user_id = ?session.user_id, cart_id = ?session.cart_id, "paid session without usable cart metadata");
            return WebhookOutcome::Ignored { reason: "missing or invalid checkout metadata".into() };
        };

        match self.orders.finalize_checkout(&completion).await {
            Ok(Finalization::Created { order, stock }) => {
                info!(order_id = %order.id, user_id = %order.user_id, total = %order.total, "order finalized");
                self.events
                    .publish(&DomainEvent::OrderFinalized {
                        order_id: order.id,
                        user_id: order.user_id,
                        total: order.total,
                        payment_session_id: order.payment_session_id.clone(),
                    })
                    .await;
                for change in stock.iter().filter(|c| c.adjustment.shortfall > 0) {
                    let requested = change.adjustment.before + change.adjustment.shortfall;
                    warn!(
                        order_id = %order.id,
                        product_id = %change.product_id,
                        requested,
                        available = change.adjustment.before,
                        "sold more units than were in stock"
                    );
                    self.events
                        .publish(&DomainEvent::StockShortfall {
                            product_id: change.product_id,
                            order_id: order.id,
                            requested,
                            available: change.adjustment.before,
                        })
                        .await;
                }
                WebhookOutcome::Finalized { order_id: order.id }
            }
            Ok(Finalization::AlreadyFinalized { order_id }) => {
                info!(%order_id, "duplicate delivery for finalized session");
                WebhookOutcome::Duplicate { order_id }
            }
            Ok(Finalization::CartMissing) => {
                error!(cart_id = %completion.cart_id, "paid session references a missing cart");
                WebhookOutcome::Ignored { reason: "cart not found".into() }
            }
            Ok(Finalization::CartEmpty) => {
                error!(cart_id = %completion.cart_id, "paid session references an empty cart");
                WebhookOutcome::Ignored { reason: "cart is empty".into() }
            }
            Ok(Finalization::CartOwnerMismatch { owner }) => {
                error!(cart_id = %completion.cart_id, user_id = %completion.user_id, %owner, "cart does not belong to the paying user");
                WebhookOutcome::Ignored { reason: "cart belongs to another user".into() }
            }
            Err(e) => {
                error!(error = %e, user_id = %completion.user_id, "finalization failed; payment captured without an order");
                WebhookOutcome::Failed
            }
        }
    }
}

fn correlate(session: &CompletedSession) -> Option<CheckoutCompletion> {
    let user_id = session.user_id.as_deref()?.parse().ok()?;
    let cart_id = session.cart_id.as_deref()?.parse().ok()?;
    Some(CheckoutCompletion {
        payment: PaymentReference {
            session_id: session.session_id.clone(),
            transaction_id: session.payment_transaction_id.clone(),
        },
        user_id,
        cart_id,
    })
}
