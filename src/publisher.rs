//! Outbound domain events.
//!
//! Publishing is fire-and-forget: a broker outage is logged and never fails the
//! request that produced the event.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::domain::events::DomainEvent;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent);
}

/// Publishes JSON-encoded events to NATS under [`DomainEvent::subject`].
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, subject = event.subject(), "could not encode event");
                return;
            }
        };
        if let Err(e) = self.client.publish(event.subject().to_string(), payload.into()).await {
            warn!(error = %e, subject = event.subject(), "event publish failed");
        }
    }
}

/// Used when no broker is configured.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &DomainEvent) {
        info!(subject = event.subject(), ?event, "domain event");
    }
}

/// Keeps every event in memory; handy for asserting on side effects.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
