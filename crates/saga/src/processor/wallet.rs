//! Wallet (point balance) payments.
//!
//! Everything happens in one transaction: the wallet row is locked, the
//! amount deducted and the payment settled. There is no asynchronous leg, so
//! a shortfall fails the order right away.

use async_trait::async_trait;
use domain::{DomainError, OrderStatus, Payment, PaymentMethod, PaymentProcessed, PaymentStatus};
use store::{Store, Transaction};

use super::PaymentProcessor;
use crate::error::{Result, SagaError};
use crate::recorder::record_processed;
use crate::resilience::{RetryPolicy, with_retry};
use crate::sync::settle_order;

pub struct WalletProcessor<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store + Clone> WalletProcessor<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    async fn try_process(&self, payment: &Payment) -> Result<Payment> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx.load_payment(payment.id()).await?;
        if payment.status().is_terminal() {
            tracing::debug!(status = %payment.status(), "wallet payment already settled");
            tx.rollback().await?;
            return Ok(payment);
        }

        let outcome = match tx.lock_wallet(payment.user_id()).await {
            Ok(mut wallet) => match wallet.deduct(payment.amount()) {
                Ok(()) => {
                    tx.save_wallet(&wallet).await?;
                    Ok(())
                }
                Err(e @ DomainError::InsufficientBalance { .. }) => Err(e.to_string()),
                Err(e) => return Err(e.into()),
            },
            Err(e) if e.is_not_found() => Err(format!("user {} has no wallet", payment.user_id())),
            Err(e) => return Err(e.into()),
        };

        match &outcome {
            Ok(()) => {
                payment.transition_to(PaymentStatus::Success, None)?;
            }
            Err(reason) => {
                tracing::warn!(
                    payment_id = %payment.id(),
                    order_id = %payment.order_id(),
                    reason = %reason,
                    "wallet payment declined"
                );
                payment.transition_to(PaymentStatus::Failed, Some(reason.clone()))?;
                settle_order(&mut tx, payment.order_id(), OrderStatus::Failed).await?;
            }
        }

        tx.update_payment(&mut payment).await?;
        tx.enqueue(
            PaymentProcessed {
                order_id: payment.order_id(),
                payment_id: payment.id(),
                status: payment.status(),
            }
            .into(),
        )
        .await?;
        tx.commit().await?;

        record_processed(&payment);
        Ok(payment)
    }
}

#[async_trait]
impl<S: Store + Clone> PaymentProcessor for WalletProcessor<S> {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Wallet
    }

    #[tracing::instrument(
        skip(self, payment),
        fields(payment_id = %payment.id(), order_id = %payment.order_id(), user_id = %payment.user_id())
    )]
    async fn process(&self, payment: &Payment) -> Result<Payment> {
        with_retry(&self.retry, SagaError::is_retryable, || self.try_process(payment)).await
    }
}

#[cfg(test)]
mod tests {
    use common::{ProductId, UserId};
    use domain::{Money, Order, OrderItem, Wallet};
    use store::{DeliveryStatus, InMemoryStore};

    use super::*;

    async fn setup(balance: i64, price: i64) -> (InMemoryStore, Payment) {
        let store = InMemoryStore::new();
        let user = UserId::new(1);
        store
            .upsert_wallet(&Wallet::new(user, Money::new(balance)).unwrap())
            .await
            .unwrap();

        let item = OrderItem::new(ProductId::new(1), "Keyboard", Money::new(price), 1).unwrap();
        let mut order = Order::place(user, vec![item], PaymentMethod::Wallet).unwrap();
        order.mark_stock_as_deducted().unwrap();
        let mut payment = Payment::create(
            order.id(),
            user,
            PaymentMethod::Wallet,
            order.final_price(),
            None,
        )
        .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&mut order).await.unwrap();
        tx.insert_payment(&mut payment).await.unwrap();
        tx.commit().await.unwrap();
        (store, payment)
    }

    #[tokio::test]
    async fn test_deducts_and_succeeds() {
        let (store, payment) = setup(5000, 3000).await;
        let processor = WalletProcessor::new(store.clone(), RetryPolicy::none());

        let settled = processor.process(&payment).await.unwrap();

        assert_eq!(settled.status(), PaymentStatus::Success);
        let wallet = store.find_wallet(UserId::new(1)).await.unwrap().unwrap();
        assert_eq!(wallet.balance(), Money::new(2000));
        let order = store.find_order(payment.order_id()).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_shortfall_fails_payment_and_order() {
        let (store, payment) = setup(50, 1000).await;
        let processor = WalletProcessor::new(store.clone(), RetryPolicy::none());

        let settled = processor.process(&payment).await.unwrap();

        assert_eq!(settled.status(), PaymentStatus::Failed);
        assert!(settled.failure_reason().is_some());
        let wallet = store.find_wallet(UserId::new(1)).await.unwrap().unwrap();
        assert_eq!(wallet.balance(), Money::new(50));
        let order = store.find_order(payment.order_id()).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Failed);
        // PaymentProcessed and OrderFailed
        assert_eq!(store.event_count(DeliveryStatus::Pending).await, 2);
    }

    #[tokio::test]
    async fn test_second_run_does_not_charge_twice() {
        let (store, payment) = setup(5000, 3000).await;
        let processor = WalletProcessor::new(store.clone(), RetryPolicy::none());

        processor.process(&payment).await.unwrap();
        processor.process(&payment).await.unwrap();

        let wallet = store.find_wallet(UserId::new(1)).await.unwrap().unwrap();
        assert_eq!(wallet.balance(), Money::new(2000));
        assert_eq!(store.event_count(DeliveryStatus::Pending).await, 1);
    }
}
