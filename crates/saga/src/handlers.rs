//! Saga steps as outbox subscribers.

use async_trait::async_trait;
use domain::SagaEvent;
use store::Store;

use crate::compensation::{CouponCompensation, StockCompensation};
use crate::error::Result;
use crate::payments::PaymentService;
use crate::sync::OrderStatusSync;

/// A consumer of saga events.
///
/// Delivery is at-least-once, so `handle` must tolerate seeing the same
/// event again.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the handler name, used in logs.
    fn name(&self) -> &'static str;

    /// Event types this handler subscribes to.
    fn handles(&self) -> &'static [&'static str];

    async fn handle(&self, event: &SagaEvent) -> Result<()>;
}

#[async_trait]
impl<S: Store + Clone> EventHandler for PaymentService<S> {
    fn name(&self) -> &'static str {
        "PaymentExecution"
    }

    fn handles(&self) -> &'static [&'static str] {
        &[SagaEvent::ORDER_PLACED]
    }

    async fn handle(&self, event: &SagaEvent) -> Result<()> {
        if let SagaEvent::OrderPlaced(placed) = event {
            self.handle_order_placed(placed).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store + Clone> EventHandler for OrderStatusSync<S> {
    fn name(&self) -> &'static str {
        "OrderStatusSync"
    }

    fn handles(&self) -> &'static [&'static str] {
        &[SagaEvent::PAYMENT_PROCESSED]
    }

    async fn handle(&self, event: &SagaEvent) -> Result<()> {
        if let SagaEvent::PaymentProcessed(processed) = event {
            self.on_payment_processed(processed).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> EventHandler for StockCompensation<S> {
    fn name(&self) -> &'static str {
        "StockCompensation"
    }

    fn handles(&self) -> &'static [&'static str] {
        &[SagaEvent::ORDER_FAILED]
    }

    async fn handle(&self, event: &SagaEvent) -> Result<()> {
        if let SagaEvent::OrderFailed(failed) = event {
            self.on_order_failed(failed).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> EventHandler for CouponCompensation<S> {
    fn name(&self) -> &'static str {
        "CouponCompensation"
    }

    fn handles(&self) -> &'static [&'static str] {
        &[SagaEvent::ORDER_FAILED]
    }

    async fn handle(&self, event: &SagaEvent) -> Result<()> {
        if let SagaEvent::OrderFailed(failed) = event {
            self.on_order_failed(failed).await?;
        }
        Ok(())
    }
}
