use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CouponId, OrderId, PaymentId, ProductId, UserId};
use domain::{Coupon, Order, Payment, PaymentStatus, Product, SagaEvent, Wallet};
use tokio::sync::Notify;

use crate::{DeliveryStatus, OutboxEntry, Result};

/// Entry point to persistence.
///
/// Reads outside a transaction see committed state only and never wait
/// on row locks. All writes to saga state go through [`Transaction`].
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: Transaction;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn find_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    async fn find_payment_by_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    async fn find_payment_by_transaction_key(&self, key: &str) -> Result<Option<Payment>>;

    /// Payments in `status` last touched before `updated_before`, oldest first.
    async fn find_stale_payments(
        &self,
        status: PaymentStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>>;

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>>;

    async fn find_coupon(&self, id: CouponId) -> Result<Option<Coupon>>;

    async fn find_wallet(&self, owner: UserId) -> Result<Option<Wallet>>;

    /// Catalog seeding. Not part of the saga.
    async fn upsert_product(&self, product: &Product) -> Result<()>;

    async fn upsert_coupon(&self, coupon: &Coupon) -> Result<()>;

    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<()>;

    /// Undelivered outbox entries in commit order.
    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    async fn mark_dispatched(&self, sequence: i64) -> Result<()>;

    /// Counts a failed delivery; the entry goes `Dead` once `attempts`
    /// reaches `max_attempts`. Returns the resulting status.
    async fn record_delivery_failure(
        &self,
        sequence: i64,
        error: &str,
        max_attempts: u32,
    ) -> Result<DeliveryStatus>;

    /// Signalled after every commit that wrote outbox entries.
    fn outbox_notify(&self) -> Arc<Notify>;
}

/// A unit of work. Dropping it without [`Transaction::commit`] rolls back.
#[async_trait]
pub trait Transaction: Send {
    /// Locks a product row until the transaction ends and returns it.
    async fn lock_product(&mut self, id: ProductId) -> Result<Product>;

    /// Writes a product previously taken with [`Transaction::lock_product`].
    async fn save_product(&mut self, product: &Product) -> Result<()>;

    async fn lock_coupon(&mut self, id: CouponId) -> Result<Coupon>;

    async fn save_coupon(&mut self, coupon: &Coupon) -> Result<()>;

    async fn lock_wallet(&mut self, owner: UserId) -> Result<Wallet>;

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<()>;

    async fn load_order(&mut self, id: OrderId) -> Result<Order>;

    /// Inserts a new order at version 1.
    async fn insert_order(&mut self, order: &mut Order) -> Result<()>;

    /// Writes `order` if its version is still the stored one, then bumps it.
    async fn update_order(&mut self, order: &mut Order) -> Result<()>;

    async fn load_payment(&mut self, id: PaymentId) -> Result<Payment>;

    async fn load_payment_by_order(&mut self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Inserts a payment. Fails with `Duplicate` if the order already has one.
    async fn insert_payment(&mut self, payment: &mut Payment) -> Result<()>;

    async fn update_payment(&mut self, payment: &mut Payment) -> Result<()>;

    /// Stages an event for publication on commit.
    async fn enqueue(&mut self, event: SagaEvent) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
