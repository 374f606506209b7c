//! Saga error types.

use common::PaymentId;
use domain::{DomainError, Money, PaymentMethod};
use store::StoreError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that can occur while running the checkout saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The command was malformed. Nothing was touched.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Domain rule violation.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Persistence error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Payment gateway error.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A retryable failure persisted past the retry budget.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<SagaError>,
    },

    /// A gateway callback reported an amount that differs from the payment.
    #[error("Callback amount {received} does not match payment {payment_id} amount {expected}")]
    AmountMismatch {
        payment_id: PaymentId,
        expected: Money,
        received: Money,
    },

    /// No processor is registered for the payment method.
    #[error("No payment processor registered for {0}")]
    UnsupportedMethod(PaymentMethod),
}

impl SagaError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        SagaError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Optimistic conflicts and database serialization failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SagaError::Store(e) if e.is_retryable())
    }

    pub fn is_validation(&self) -> bool {
        match self {
            SagaError::Validation(_) => true,
            SagaError::Domain(e) => e.is_validation(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SagaError::NotFound { .. } => true,
            SagaError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Business conflicts the caller can act on: stock, balance, coupon,
    /// illegal transitions, callback mismatches and exhausted retries.
    pub fn is_conflict(&self) -> bool {
        match self {
            SagaError::Domain(e) => e.is_resource_conflict() || e.is_invalid_transition(),
            SagaError::RetriesExhausted { .. } | SagaError::AmountMismatch { .. } => true,
            SagaError::Store(e) => e.is_concurrency_conflict(),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
