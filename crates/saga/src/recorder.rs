//! Single write path for payment status changes.
//!
//! Processors, gateway callbacks and reconciliation all end here, so a
//! status reported twice or by two racing paths lands once. A
//! `PaymentProcessed` event is enqueued only when the status moved.

use common::PaymentId;
use domain::{Payment, PaymentProcessed, PaymentStatus};
use store::{Store, Transaction};

use crate::error::{Result, SagaError};
use crate::gateway::GatewayTransaction;
use crate::resilience::{RetryPolicy, with_retry};

/// A status report for one payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: PaymentStatus,
    pub transaction_key: Option<String>,
    pub reason: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: PaymentStatus) -> Self {
        Self {
            status,
            transaction_key: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_transaction_key(mut self, key: impl Into<String>) -> Self {
        self.transaction_key = Some(key.into());
        self
    }
}

impl From<&GatewayTransaction> for StatusUpdate {
    fn from(tx: &GatewayTransaction) -> Self {
        Self {
            status: tx.status.to_payment_status(),
            transaction_key: Some(tx.transaction_key.clone()),
            reason: tx.reason.clone(),
        }
    }
}

/// Applies [`StatusUpdate`]s to stored payments.
#[derive(Clone)]
pub struct PaymentRecorder<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store + Clone> PaymentRecorder<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Applies `update` and returns the stored payment.
    ///
    /// A `Pending` report for a payment that already settled is stale and
    /// ignored. A different final outcome for a settled payment is an
    /// invalid transition and is returned as an error.
    #[tracing::instrument(skip(self, update), fields(status = %update.status))]
    pub async fn apply(&self, payment_id: PaymentId, update: &StatusUpdate) -> Result<Payment> {
        with_retry(&self.retry, SagaError::is_retryable, || {
            self.try_apply(payment_id, update)
        })
        .await
    }

    async fn try_apply(&self, payment_id: PaymentId, update: &StatusUpdate) -> Result<Payment> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx.load_payment(payment_id).await?;

        if payment.status().is_terminal() && update.status == PaymentStatus::Pending {
            tracing::debug!(current = %payment.status(), "stale pending report ignored");
            tx.rollback().await?;
            return Ok(payment);
        }

        let key_changed = match &update.transaction_key {
            Some(key) => payment.assign_transaction_key(key.clone())?,
            None => false,
        };
        let status_changed = payment.transition_to(update.status, update.reason.clone())?;

        if !key_changed && !status_changed {
            tracing::debug!("payment already up to date");
            tx.rollback().await?;
            return Ok(payment);
        }

        tx.update_payment(&mut payment).await?;
        if status_changed {
            tx.enqueue(
                PaymentProcessed {
                    order_id: payment.order_id(),
                    payment_id: payment.id(),
                    status: payment.status(),
                }
                .into(),
            )
            .await?;
        }
        tx.commit().await?;

        if status_changed {
            record_processed(&payment);
        }
        Ok(payment)
    }
}

/// Counts a payment that reached a new status.
pub(crate) fn record_processed(payment: &Payment) {
    metrics::counter!(
        "payments_processed_total",
        "method" => payment.method().as_str(),
        "status" => payment.status().as_str()
    )
    .increment(1);
    tracing::info!(
        payment_id = %payment.id(),
        order_id = %payment.order_id(),
        status = %payment.status(),
        "payment processed"
    );
}
