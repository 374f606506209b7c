//! Payment lifecycle entry points.
//!
//! [`PaymentService::process`] is the one "process and sync" path shared by
//! event delivery and reconciliation. Gateway callbacks go through
//! [`PaymentService::confirm`] and end in the same recorder.

use common::{OrderId, PaymentId};
use domain::{Money, OrderPlaced, Payment};
use serde::{Deserialize, Serialize};
use store::{Store, StoreError, Transaction};

use crate::error::{Result, SagaError};
use crate::gateway::TransactionStatus;
use crate::processor::ProcessorRegistry;
use crate::recorder::{PaymentRecorder, StatusUpdate};
use crate::resilience::RetryPolicy;

/// Out-of-band status report posted by the PG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallback {
    pub transaction_key: String,
    pub order_id: OrderId,
    pub amount: Money,
    pub status: TransactionStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

pub struct PaymentService<S> {
    store: S,
    processors: ProcessorRegistry,
    recorder: PaymentRecorder<S>,
}

impl<S: Store + Clone> PaymentService<S> {
    pub fn new(store: S, processors: ProcessorRegistry, retry: RetryPolicy) -> Self {
        Self {
            recorder: PaymentRecorder::new(store.clone(), retry),
            store,
            processors,
        }
    }

    /// Creates the payment for a placed order and runs it.
    ///
    /// Redelivery finds the payment created the first time.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id, method = %event.payment_method))]
    pub async fn handle_order_placed(&self, event: &OrderPlaced) -> Result<Payment> {
        let payment = self.create_payment(event).await?;
        self.run(payment).await
    }

    /// Drives a stored payment forward through its method's processor.
    #[tracing::instrument(skip(self))]
    pub async fn process(&self, payment_id: PaymentId) -> Result<Payment> {
        let payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| SagaError::not_found("payment", payment_id))?;
        self.run(payment).await
    }

    /// Applies a PG callback.
    #[tracing::instrument(
        skip(self, callback),
        fields(transaction_key = %callback.transaction_key, order_id = %callback.order_id, status = %callback.status)
    )]
    pub async fn confirm(&self, callback: &PaymentCallback) -> Result<Payment> {
        let payment = match self
            .store
            .find_payment_by_transaction_key(&callback.transaction_key)
            .await?
        {
            Some(payment) => payment,
            // The callback can arrive before the create response was recorded.
            None => self
                .store
                .find_payment_by_order(callback.order_id)
                .await?
                .ok_or_else(|| SagaError::not_found("payment", &callback.transaction_key))?,
        };

        if payment.order_id() != callback.order_id {
            return Err(SagaError::Validation(format!(
                "transaction {} belongs to order {}, not {}",
                callback.transaction_key,
                payment.order_id(),
                callback.order_id
            )));
        }
        if payment.amount() != callback.amount {
            tracing::warn!(
                payment_id = %payment.id(),
                expected = %payment.amount(),
                received = %callback.amount,
                "callback amount mismatch"
            );
            return Err(SagaError::AmountMismatch {
                payment_id: payment.id(),
                expected: payment.amount(),
                received: callback.amount,
            });
        }
        if callback.status == TransactionStatus::Pending {
            tracing::debug!("pending callback ignored");
            return Ok(payment);
        }

        let mut update = StatusUpdate::new(callback.status.to_payment_status())
            .with_transaction_key(callback.transaction_key.clone());
        update.reason = callback.reason.clone();
        self.recorder.apply(payment.id(), &update).await
    }

    async fn run(&self, payment: Payment) -> Result<Payment> {
        if payment.status().is_terminal() {
            tracing::debug!(payment_id = %payment.id(), status = %payment.status(), "payment already settled");
            return Ok(payment);
        }
        self.processors.get(payment.method())?.process(&payment).await
    }

    async fn create_payment(&self, event: &OrderPlaced) -> Result<Payment> {
        if let Some(existing) = self.store.find_payment_by_order(event.order_id).await? {
            tracing::debug!(payment_id = %existing.id(), "payment already created");
            return Ok(existing);
        }

        let mut payment = Payment::create(
            event.order_id,
            event.user_id,
            event.payment_method,
            event.final_price,
            event.card.clone(),
        )?;
        let mut tx = self.store.begin().await?;
        match tx.insert_payment(&mut payment).await {
            Ok(()) => {
                tx.commit().await?;
                tracing::info!(payment_id = %payment.id(), amount = %payment.amount(), "payment created");
                Ok(payment)
            }
            // A concurrent delivery won the insert.
            Err(StoreError::Duplicate { .. }) => {
                tx.rollback().await?;
                self.store
                    .find_payment_by_order(event.order_id)
                    .await?
                    .ok_or_else(|| SagaError::not_found("payment", event.order_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}
