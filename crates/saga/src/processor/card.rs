//! Card payments through the external PG.
//!
//! The PG is asked about the order first, so a re-run never submits a second
//! charge. Transient PG failures retry the whole lookup-then-submit step: a
//! request that timed out may still have been accepted, and the next attempt
//! finds it instead of charging again. A request the PG refuses fails the
//! payment. When the PG cannot be reached the payment is left where it is for
//! reconciliation; an outcome is never guessed.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{DomainError, Payment, PaymentMethod, PaymentStatus};
use store::Store;

use super::PaymentProcessor;
use crate::error::Result;
use crate::gateway::{GatewayError, GatewayTransaction, PaymentGateway, PaymentRequest};
use crate::recorder::{PaymentRecorder, StatusUpdate};
use crate::resilience::{RetryPolicy, with_retry};

pub struct CardProcessor<S> {
    gateway: Arc<dyn PaymentGateway>,
    recorder: PaymentRecorder<S>,
    callback_url: String,
    pg_retry: RetryPolicy,
}

impl<S: Store + Clone> CardProcessor<S> {
    pub fn new(
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        callback_url: impl Into<String>,
        retry: RetryPolicy,
        pg_retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            recorder: PaymentRecorder::new(store, retry),
            callback_url: callback_url.into(),
            pg_retry,
        }
    }

    /// The transaction the PG holds for this payment, submitting one if
    /// there is none yet.
    async fn query_or_request(
        &self,
        payment: &Payment,
    ) -> std::result::Result<GatewayTransaction, GatewayError> {
        let user_id = payment.user_id();

        if let Some(key) = payment.transaction_key() {
            return self.gateway.find_transaction(user_id, key).await;
        }

        let existing = self
            .gateway
            .find_transactions_by_order(user_id, payment.order_id())
            .await?;
        if let Some(last) = existing.into_iter().last() {
            tracing::info!(
                transaction_key = %last.transaction_key,
                "order already submitted to PG, resuming"
            );
            return Ok(last);
        }

        // Only a payment that was never submitted gets a new request.
        let request = PaymentRequest {
            order_id: payment.order_id(),
            amount: payment.amount(),
            card: payment
                .card()
                .cloned()
                .ok_or_else(|| GatewayError::Rejected {
                    code: "Bad Request".to_string(),
                    message: DomainError::MissingCardDetails.to_string(),
                })?,
            callback_url: self.callback_url.clone(),
        };
        tracing::info!(card = %request.card.masked(), "submitting payment to PG");
        self.gateway.request_payment(user_id, &request).await
    }
}

#[async_trait]
impl<S: Store + Clone> PaymentProcessor for CardProcessor<S> {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    #[tracing::instrument(
        skip(self, payment),
        fields(payment_id = %payment.id(), order_id = %payment.order_id(), status = %payment.status())
    )]
    async fn process(&self, payment: &Payment) -> Result<Payment> {
        if payment.status().is_terminal() {
            return Ok(payment.clone());
        }

        let outcome = with_retry(&self.pg_retry, GatewayError::is_retryable, || {
            self.query_or_request(payment)
        })
        .await;

        match outcome {
            Ok(transaction) => {
                self.recorder
                    .apply(payment.id(), &StatusUpdate::from(&transaction))
                    .await
            }
            Err(err)
                if err.is_rejection()
                    && payment.status() == PaymentStatus::Created
                    && payment.transaction_key().is_none() =>
            {
                tracing::warn!(error = %err, "PG refused the payment");
                self.recorder
                    .apply(
                        payment.id(),
                        &StatusUpdate::new(PaymentStatus::Failed).with_reason(err.to_string()),
                    )
                    .await
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "PG unavailable, payment left {} for reconciliation",
                    payment.status()
                );
                metrics::counter!("pg_fallbacks_total", "reason" => err.kind()).increment(1);
                Ok(payment.clone())
            }
        }
    }
}
