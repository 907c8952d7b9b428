//! Domain events
use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::Money;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderFinalized { order_id: Uuid, user_id: Uuid, total: Money, payment_session_id: String },
    OrderStatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    /// A paid order took more units than were on hand; stock was clamped at zero.
    StockShortfall { product_id: Uuid, order_id: Uuid, requested: u32, available: u32 },
}

impl DomainEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::OrderFinalized { .. } => "storefront.orders.finalized",
            Self::OrderStatusChanged { .. } => "storefront.orders.status_changed",
            Self::StockShortfall { .. } => "storefront.inventory.shortfall",
        }
    }
}
