//! Contract with the external payment gateway (PG).
//!
//! Business failures come back as [`GatewayError::Rejected`]; transport and
//! server failures are retryable and count against the circuit breaker.

pub mod http;
pub mod resilient;
pub mod simulator;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{CardDetails, Money, PaymentStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::CircuitOpenError;

pub use http::{HttpGatewayConfig, HttpPaymentGateway};
pub use resilient::ResilientGateway;
pub use simulator::{InMemoryPaymentGateway, SimulatedOutcome};

/// Status of a transaction as the PG reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn to_payment_status(self) -> PaymentStatus {
        match self {
            TransactionStatus::Pending => PaymentStatus::Pending,
            TransactionStatus::Success => PaymentStatus::Success,
            TransactionStatus::Failed => PaymentStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A transaction known to the PG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTransaction {
    pub transaction_key: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A charge submitted to the PG.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub card: CardDetails,
    /// Where the PG reports the final outcome.
    pub callback_url: String,
}

/// Errors from the payment gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("PG unreachable: {0}")]
    Transport(String),

    #[error("PG request timed out")]
    Timeout,

    #[error("PG server error: HTTP {status}")]
    Server { status: u16 },

    /// The PG answered with a failure envelope.
    #[error("PG rejected the request [{code}]: {message}")]
    Rejected { code: String, message: String },

    #[error("PG has no transaction {0}")]
    NotFound(String),

    #[error("Unreadable PG response: {0}")]
    Decode(String),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
}

impl GatewayError {
    /// Failures of the PG itself rather than of the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_) | GatewayError::Timeout | GatewayError::Server { .. }
        )
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, GatewayError::Rejected { .. })
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Transport(_) => "transport",
            GatewayError::Timeout => "timeout",
            GatewayError::Server { .. } => "server",
            GatewayError::Rejected { .. } => "rejected",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Decode(_) => "decode",
            GatewayError::CircuitOpen(_) => "circuit_open",
        }
    }
}

/// Outbound PG operations. `user_id` identifies the paying customer.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submits a new charge. The PG normally answers `PENDING` and reports
    /// the outcome later through the callback URL.
    async fn request_payment(
        &self,
        user_id: UserId,
        request: &PaymentRequest,
    ) -> Result<GatewayTransaction, GatewayError>;

    /// Every transaction the PG holds for an order, oldest first.
    async fn find_transactions_by_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Vec<GatewayTransaction>, GatewayError>;

    async fn find_transaction(
        &self,
        user_id: UserId,
        transaction_key: &str,
    ) -> Result<GatewayTransaction, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_onto_payment_states() {
        assert_eq!(TransactionStatus::Pending.to_payment_status(), PaymentStatus::Pending);
        assert_eq!(TransactionStatus::Success.to_payment_status(), PaymentStatus::Success);
        assert_eq!(TransactionStatus::Failed.to_payment_status(), PaymentStatus::Failed);
    }

    #[test]
    fn test_transaction_wire_format() {
        let tx: GatewayTransaction = serde_json::from_value(serde_json::json!({
            "transactionKey": "20250816:TR:9577c5",
            "status": "SUCCESS"
        }))
        .unwrap();
        assert_eq!(tx.transaction_key, "20250816:TR:9577c5");
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.reason, None);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::Timeout.is_retryable());
        assert!(GatewayError::Server { status: 503 }.is_retryable());
        assert!(GatewayError::Transport("refused".into()).is_retryable());

        let rejected = GatewayError::Rejected {
            code: "Bad Request".into(),
            message: "invalid card".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(rejected.is_rejection());
        assert!(
            !GatewayError::CircuitOpen(CircuitOpenError { name: "pg".into() }).is_retryable()
        );
    }
}
