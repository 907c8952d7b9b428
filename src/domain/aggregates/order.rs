//! Order Aggregate
//!
//! Orders are only ever created by checkout finalization, already paid, and are
//! immutable afterwards except for their status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::cart::Cart;
use crate::domain::value_objects::{Money, Quantity};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Paid, Processing, Shipped, Delivered, Cancelled, Refunded }

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        Self::Pending, Self::Paid, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled, Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Cancelled | Self::Refunded) }

    /// Edges of the fulfilment graph. Staying in the same status is handled by the policy.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        !self.is_terminal() && matches!(
            (self, next),
            (Pending, Paid)
                | (Paid, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | Paid | Processing, Cancelled)
                | (Paid | Processing | Shipped | Delivered, Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

/// How strictly admin status changes are checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Only edges of the fulfilment graph are allowed.
    #[default]
    Strict,
    /// Any status may follow any other.
    Unrestricted,
}

impl TransitionPolicy {
    pub fn allows(self, from: OrderStatus, to: OrderStatus) -> bool {
        from == to || match self {
            Self::Strict => from.can_transition_to(to),
            Self::Unrestricted => true,
        }
    }
}

impl FromStr for TransitionPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "unrestricted" => Ok(Self::Unrestricted),
            other => Err(format!("unknown order status policy '{other}'")),
        }
    }
}

/// Identifiers of the external payment that produced an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentReference {
    pub session_id: String,
    pub transaction_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: Quantity,
    #[serde(rename = "unitPriceAtPurchase")]
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub subtotal: Money,
    pub total: Money,
    pub payment_session_id: String,
    pub payment_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Builds a paid order from the cart as it is now. Names and prices are copied
    /// so later catalog edits never rewrite purchase history.
    pub fn from_cart(cart: &Cart, payment: PaymentReference) -> Result<Self, OrderError> {
        if cart.is_empty() { return Err(OrderError::NoItems); }
        let items: Vec<OrderItem> = cart.items().iter().map(|line| OrderItem {
            id: Uuid::now_v7(),
            product_id: line.product_id,
            product_name: line.product.name.en.clone(),
            quantity: line.quantity,
            unit_price: line.product.price,
            line_total: line.line_total(),
        }).collect();
        let subtotal: Money = items.iter().map(|i| i.line_total).sum();
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), user_id: cart.user_id, status: OrderStatus::Paid, subtotal, total: subtotal,
            payment_session_id: payment.session_id, payment_transaction_id: payment.transaction_id,
            created_at: now, updated_at: now, items,
        })
    }

    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn items_total(&self) -> Money { self.items.iter().map(|i| i.line_total).sum() }

    /// Returns the previous status.
    pub fn change_status(&mut self, next: OrderStatus, policy: TransitionPolicy) -> Result<OrderStatus, OrderError> {
        let from = self.status;
        if !policy.allows(from, next) { return Err(OrderError::InvalidTransition { from, to: next }); }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("cannot change order status from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("unknown order status '{0}'")]
    UnknownStatus(String),
}
