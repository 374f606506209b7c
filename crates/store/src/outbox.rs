//! Outbox rows awaiting delivery to event handlers.

use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use domain::{DomainEvent, SagaEvent};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Dispatched,
    /// Gave up after too many failed deliveries.
    Dead,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Dispatched => "DISPATCHED",
            DeliveryStatus::Dead => "DEAD",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed event waiting in the outbox.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// Commit order; delivery follows it.
    pub sequence: i64,
    pub event_id: EventId,
    pub event_type: String,
    pub order_id: OrderId,
    pub payload: serde_json::Value,
    /// Failed deliveries so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Builds an entry for `event`. The sequence is assigned at commit.
    pub fn new(event: &SagaEvent) -> Result<Self> {
        Ok(Self {
            sequence: 0,
            event_id: EventId::new(),
            event_type: event.event_type().to_string(),
            order_id: event.order_id(),
            payload: serde_json::to_value(event)?,
            attempts: 0,
            created_at: Utc::now(),
        })
    }

    /// Decodes the payload back into the event.
    pub fn decode(&self) -> Result<SagaEvent> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
