//! Undoing reservations for orders that ended unpaid.
//!
//! Both handlers consume `OrderFailed` independently and in no particular
//! order. Finding nothing to undo is success.

use std::collections::BTreeMap;

use common::ProductId;
use domain::{OrderFailed, OrderStatus};
use store::{Store, Transaction};

use crate::error::{Result, SagaError};
use crate::resilience::{RetryPolicy, with_retry};

/// Puts reserved stock back on the shelf.
///
/// The order's stock-deducted flag is cleared in the same transaction, so
/// redelivery finds nothing left to restore.
#[derive(Clone)]
pub struct StockCompensation<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store> StockCompensation<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn on_order_failed(&self, event: &OrderFailed) -> Result<()> {
        with_retry(&self.retry, SagaError::is_retryable, || self.restore(event)).await
    }

    async fn restore(&self, event: &OrderFailed) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let mut order = tx.load_order(event.order_id).await?;

        if !matches!(order.status(), OrderStatus::Failed | OrderStatus::Cancelled) {
            tracing::warn!(status = %order.status(), "order is not failed, stock kept");
            tx.rollback().await?;
            return Ok(());
        }
        if !order.is_stock_deducted() {
            tracing::debug!("stock already restored");
            tx.rollback().await?;
            return Ok(());
        }

        let mut quantities: BTreeMap<ProductId, u32> = BTreeMap::new();
        for item in order.items() {
            *quantities.entry(item.product_id()).or_default() += item.quantity();
        }
        for (product_id, quantity) in quantities {
            let mut product = tx.lock_product(product_id).await?;
            product.increase_stock(quantity)?;
            tx.save_product(&product).await?;
        }

        order.mark_stock_as_restored();
        tx.update_order(&mut order).await?;
        tx.commit().await?;

        metrics::counter!("compensations_total", "kind" => "stock").increment(1);
        tracing::info!(items = order.items().len(), "stock restored");
        Ok(())
    }
}

/// Returns the order's coupon to unused.
#[derive(Clone)]
pub struct CouponCompensation<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store> CouponCompensation<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn on_order_failed(&self, event: &OrderFailed) -> Result<()> {
        with_retry(&self.retry, SagaError::is_retryable, || self.restore(event)).await
    }

    async fn restore(&self, event: &OrderFailed) -> Result<()> {
        let order = self
            .store
            .find_order(event.order_id)
            .await?
            .ok_or_else(|| SagaError::not_found("order", event.order_id))?;
        let Some(coupon_id) = order.applied_coupon_id() else {
            tracing::debug!("no coupon to restore");
            return Ok(());
        };
        if !matches!(order.status(), OrderStatus::Failed | OrderStatus::Cancelled) {
            tracing::warn!(status = %order.status(), "order is not failed, coupon kept");
            return Ok(());
        }

        let mut tx = self.store.begin().await?;
        let mut coupon = tx.lock_coupon(coupon_id).await?;
        // The backlink keeps a coupon re-spent on a later order untouched.
        if !coupon.restore_for(order.id()) {
            tracing::debug!(coupon_id = %coupon_id, "coupon already restored");
            tx.rollback().await?;
            return Ok(());
        }
        tx.save_coupon(&coupon).await?;
        tx.commit().await?;

        metrics::counter!("compensations_total", "kind" => "coupon").increment(1);
        tracing::info!(coupon_id = %coupon_id, "coupon restored");
        Ok(())
    }
}
