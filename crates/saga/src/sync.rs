//! Keeps the order status in line with its payment.

use common::OrderId;
use domain::{OrderFailed, OrderStatus, PaymentProcessed, PaymentStatus};
use store::{Store, Transaction};

use crate::error::{Result, SagaError};
use crate::resilience::{RetryPolicy, with_retry};

/// Order status a payment status settles the order into, if any.
pub fn order_status_for(payment: PaymentStatus) -> Option<OrderStatus> {
    match payment {
        PaymentStatus::Success => Some(OrderStatus::Completed),
        PaymentStatus::Failed => Some(OrderStatus::Failed),
        PaymentStatus::Canceled => Some(OrderStatus::Cancelled),
        PaymentStatus::Created | PaymentStatus::Pending => None,
    }
}

/// Moves the order to `target` inside `tx`.
///
/// Returns `false` when the order is already there. When the order ends
/// unpaid and still holds stock, `OrderFailed` is enqueued so compensation
/// runs after commit.
pub(crate) async fn settle_order<T: Transaction>(
    tx: &mut T,
    order_id: OrderId,
    target: OrderStatus,
) -> Result<bool> {
    let mut order = tx.load_order(order_id).await?;
    if order.status() == target {
        return Ok(false);
    }

    match target {
        OrderStatus::Completed => order.complete()?,
        OrderStatus::Failed => order.fail()?,
        OrderStatus::Cancelled => order.cancel()?,
        OrderStatus::Pending => {
            return Err(SagaError::Validation(
                "an order cannot be settled back to PENDING".to_string(),
            ));
        }
    }
    tx.update_order(&mut order).await?;

    if target != OrderStatus::Completed && order.is_stock_deducted() {
        tx.enqueue(OrderFailed { order_id }.into()).await?;
    }
    tracing::info!(order_id = %order_id, status = %target, "order settled");
    Ok(true)
}

/// Applies `PaymentProcessed` events to orders.
#[derive(Clone)]
pub struct OrderStatusSync<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store + Clone> OrderStatusSync<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    #[tracing::instrument(
        skip(self, event),
        fields(order_id = %event.order_id, payment_id = %event.payment_id, status = %event.status)
    )]
    pub async fn on_payment_processed(&self, event: &PaymentProcessed) -> Result<()> {
        let Some(target) = order_status_for(event.status) else {
            tracing::debug!("payment not settled yet, order left pending");
            return Ok(());
        };

        with_retry(&self.retry, SagaError::is_retryable, || async {
            let mut tx = self.store.begin().await?;
            if settle_order(&mut tx, event.order_id, target).await? {
                tx.commit().await?;
            } else {
                tracing::debug!("order already settled");
                tx.rollback().await?;
            }
            Ok::<_, SagaError>(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use common::{PaymentId, ProductId, UserId};
    use domain::{DomainError, Money, Order, OrderItem, PaymentMethod};
    use store::{DeliveryStatus, InMemoryStore};

    use super::*;

    async fn placed_order(store: &InMemoryStore) -> Order {
        let item = OrderItem::new(ProductId::new(1), "Mouse", Money::new(1000), 2).unwrap();
        let mut order = Order::place(UserId::new(1), vec![item], PaymentMethod::Card).unwrap();
        order.mark_stock_as_deducted().unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&mut order).await.unwrap();
        tx.commit().await.unwrap();
        order
    }

    fn event(order: &Order, status: PaymentStatus) -> PaymentProcessed {
        PaymentProcessed {
            order_id: order.id(),
            payment_id: PaymentId::new(),
            status,
        }
    }

    fn sync(store: &InMemoryStore) -> OrderStatusSync<InMemoryStore> {
        OrderStatusSync::new(store.clone(), RetryPolicy::none())
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(order_status_for(PaymentStatus::Success), Some(OrderStatus::Completed));
        assert_eq!(order_status_for(PaymentStatus::Failed), Some(OrderStatus::Failed));
        assert_eq!(order_status_for(PaymentStatus::Canceled), Some(OrderStatus::Cancelled));
        assert_eq!(order_status_for(PaymentStatus::Pending), None);
        assert_eq!(order_status_for(PaymentStatus::Created), None);
    }

    #[tokio::test]
    async fn test_success_completes_without_compensation() {
        let store = InMemoryStore::new();
        let order = placed_order(&store).await;

        sync(&store)
            .on_payment_processed(&event(&order, PaymentStatus::Success))
            .await
            .unwrap();

        let stored = store.find_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Completed);
        assert_eq!(store.event_count(DeliveryStatus::Pending).await, 0);
    }

    #[tokio::test]
    async fn test_failure_requests_compensation_once() {
        let store = InMemoryStore::new();
        let order = placed_order(&store).await;
        let sync = sync(&store);
        let failed = event(&order, PaymentStatus::Failed);

        sync.on_payment_processed(&failed).await.unwrap();
        sync.on_payment_processed(&failed).await.unwrap();

        let stored = store.find_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Failed);
        assert_eq!(store.event_count(DeliveryStatus::Pending).await, 1);
    }

    #[tokio::test]
    async fn test_cancel_maps_to_cancelled() {
        let store = InMemoryStore::new();
        let order = placed_order(&store).await;

        sync(&store)
            .on_payment_processed(&event(&order, PaymentStatus::Canceled))
            .await
            .unwrap();

        let stored = store.find_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_pending_is_a_no_op() {
        let store = InMemoryStore::new();
        let order = placed_order(&store).await;

        sync(&store)
            .on_payment_processed(&event(&order, PaymentStatus::Pending))
            .await
            .unwrap();

        let stored = store.find_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
        assert_eq!(stored.version(), order.version());
    }

    #[tokio::test]
    async fn test_contradicting_outcome_is_rejected() {
        let store = InMemoryStore::new();
        let order = placed_order(&store).await;
        let sync = sync(&store);

        sync.on_payment_processed(&event(&order, PaymentStatus::Success))
            .await
            .unwrap();
        let err = sync
            .on_payment_processed(&event(&order, PaymentStatus::Failed))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SagaError::Domain(DomainError::InvalidOrderTransition { .. })
        ));
    }
}
