//! Administrative order status changes.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderError, OrderStatus, TransitionPolicy};
use crate::domain::events::DomainEvent;
use crate::publisher::EventPublisher;
use crate::store::{OrderStore, StoreError};

#[derive(Debug, Error)]
pub enum StatusChangeError {
    #[error("order not found")]
    NotFound,
    #[error(transparent)]
    Rejected(#[from] OrderError),
    #[error("order status was changed concurrently")]
    Conflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct OrderAdmin {
    orders: Arc<dyn OrderStore>,
    policy: TransitionPolicy,
    events: Arc<dyn EventPublisher>,
}

impl OrderAdmin {
    pub fn new(orders: Arc<dyn OrderStore>, policy: TransitionPolicy, events: Arc<dyn EventPublisher>) -> Self {
        Self { orders, policy, events }
    }

    #[instrument(skip(self))]
    pub async fn change_status(&self, id: Uuid, next: OrderStatus) -> Result<Order, StatusChangeError> {
        let mut order = self.orders.order(id).await?.ok_or(StatusChangeError::NotFound)?;
        let from = order.change_status(next, self.policy)?;
        if from == next {
            return Ok(order);
        }
        let Some(updated) = self.orders.update_status(id, from, next).await? else {
            warn!(%from, %next, "status changed underneath the update");
            return Err(StatusChangeError::Conflict);
        };
        info!(%from, to = %next, "order status changed");
        self.events.publish(&DomainEvent::OrderStatusChanged { order_id: id, from, to: next }).await;
        Ok(updated)
    }
}
