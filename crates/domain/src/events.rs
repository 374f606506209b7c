//! Facts published by the saga.
//!
//! Every event is written to the outbox in the same transaction as the
//! state change that caused it and delivered only after commit.

use common::{OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::money::Money;
use crate::order::{Order, OrderItem};
use crate::payment::{CardDetails, PaymentMethod, PaymentStatus};

/// Trait for domain events.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name used for routing.
    fn event_type(&self) -> &'static str;
}

/// An order was placed and its reservations committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub payment_method: PaymentMethod,
    pub final_price: Money,
    pub items: Vec<OrderItem>,
    pub card: Option<CardDetails>,
}

impl OrderPlaced {
    pub fn from_order(order: &Order, card: Option<CardDetails>) -> Self {
        Self {
            order_id: order.id(),
            user_id: order.user_id(),
            payment_method: order.payment_method(),
            final_price: order.final_price(),
            items: order.items().to_vec(),
            card,
        }
    }
}

/// A payment reached a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProcessed {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
}

/// An order with reservations ended unpaid; compensation is owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFailed {
    pub order_id: OrderId,
}

/// Every event the saga publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    OrderPlaced(OrderPlaced),
    PaymentProcessed(PaymentProcessed),
    OrderFailed(OrderFailed),
}

impl SagaEvent {
    pub const ORDER_PLACED: &'static str = "OrderPlaced";
    pub const PAYMENT_PROCESSED: &'static str = "PaymentProcessed";
    pub const ORDER_FAILED: &'static str = "OrderFailed";

    /// The order this event belongs to.
    pub fn order_id(&self) -> OrderId {
        match self {
            SagaEvent::OrderPlaced(e) => e.order_id,
            SagaEvent::PaymentProcessed(e) => e.order_id,
            SagaEvent::OrderFailed(e) => e.order_id,
        }
    }
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::OrderPlaced(_) => Self::ORDER_PLACED,
            SagaEvent::PaymentProcessed(_) => Self::PAYMENT_PROCESSED,
            SagaEvent::OrderFailed(_) => Self::ORDER_FAILED,
        }
    }
}

impl From<OrderPlaced> for SagaEvent {
    fn from(event: OrderPlaced) -> Self {
        SagaEvent::OrderPlaced(event)
    }
}

impl From<PaymentProcessed> for SagaEvent {
    fn from(event: PaymentProcessed) -> Self {
        SagaEvent::PaymentProcessed(event)
    }
}

impl From<OrderFailed> for SagaEvent {
    fn from(event: OrderFailed) -> Self {
        SagaEvent::OrderFailed(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let order_id = OrderId::new();
        let failed = SagaEvent::from(OrderFailed { order_id });
        assert_eq!(failed.event_type(), "OrderFailed");
        assert_eq!(failed.order_id(), order_id);

        let processed = SagaEvent::from(PaymentProcessed {
            order_id,
            payment_id: PaymentId::new(),
            status: PaymentStatus::Success,
        });
        assert_eq!(processed.event_type(), "PaymentProcessed");
    }

    #[test]
    fn test_tagged_serialization() {
        let order_id = OrderId::new();
        let json = serde_json::to_value(SagaEvent::from(OrderFailed { order_id })).unwrap();
        assert_eq!(json["type"], "OrderFailed");
        assert_eq!(json["data"]["order_id"], order_id.to_string());

        let back: SagaEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.order_id(), order_id);
    }
}
