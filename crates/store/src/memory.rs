use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CouponId, OrderId, PaymentId, ProductId, UserId, Version};
use domain::{Coupon, Order, Payment, PaymentStatus, Product, SagaEvent, Wallet};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, RwLock};

use crate::{
    DeliveryStatus, OutboxEntry, Result, StoreError,
    store::{Store, Transaction},
};

/// A ledger row: an exclusive lock plus the committed value.
///
/// Readers outside a transaction only touch `value`, so they never wait
/// behind a lock holder.
struct RowCell<T> {
    lock: Arc<Mutex<()>>,
    value: RwLock<T>,
}

type Row<T> = Arc<RowCell<T>>;

fn new_row<T>(value: T) -> Row<T> {
    Arc::new(RowCell {
        lock: Arc::new(Mutex::new(())),
        value: RwLock::new(value),
    })
}

type Table<K, T> = RwLock<HashMap<K, Row<T>>>;

struct OutboxRow {
    entry: OutboxEntry,
    status: DeliveryStatus,
    last_error: Option<String>,
}

#[derive(Default)]
struct Records {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    payment_by_order: HashMap<OrderId, PaymentId>,
    payment_by_key: HashMap<String, PaymentId>,
    outbox: BTreeMap<i64, OutboxRow>,
    next_sequence: i64,
}

#[derive(Default)]
struct Shared {
    products: Table<ProductId, Product>,
    coupons: Table<CouponId, Coupon>,
    wallets: Table<UserId, Wallet>,
    records: Mutex<Records>,
    notify: Arc<Notify>,
}

/// In-memory store with real per-row exclusive locks.
///
/// Behaves like the PostgreSQL store: ledger rows block concurrent lockers
/// until commit, versioned rows are checked at commit, and the outbox is
/// written atomically with everything else.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders persisted.
    pub async fn order_count(&self) -> usize {
        self.shared.records.lock().await.orders.len()
    }

    /// Number of outbox entries in `status`.
    pub async fn event_count(&self, status: DeliveryStatus) -> usize {
        self.shared
            .records
            .lock()
            .await
            .outbox
            .values()
            .filter(|row| row.status == status)
            .count()
    }

    /// Last delivery error recorded for an outbox entry.
    pub async fn last_delivery_error(&self, sequence: i64) -> Option<String> {
        self.shared
            .records
            .lock()
            .await
            .outbox
            .get(&sequence)
            .and_then(|row| row.last_error.clone())
    }
}

async fn read_row<K: Eq + Hash, T: Clone>(table: &Table<K, T>, key: &K) -> Option<T> {
    let row = table.read().await.get(key).cloned()?;
    let value = row.value.read().await.clone();
    Some(value)
}

async fn upsert_row<K: Eq + Hash, T: Clone>(table: &Table<K, T>, key: K, value: &T) {
    let existing = table.read().await.get(&key).cloned();
    match existing {
        Some(row) => {
            let _guard = row.lock.lock().await;
            *row.value.write().await = value.clone();
        }
        None => {
            table
                .write()
                .await
                .entry(key)
                .or_insert_with(|| new_row(value.clone()));
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            products: HashMap::new(),
            coupons: HashMap::new(),
            wallets: HashMap::new(),
            orders: Vec::new(),
            payments: Vec::new(),
            events: Vec::new(),
        })
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.shared.records.lock().await.orders.get(&id).cloned())
    }

    async fn find_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.shared.records.lock().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let records = self.shared.records.lock().await;
        Ok(records
            .payment_by_order
            .get(&order_id)
            .and_then(|id| records.payments.get(id))
            .cloned())
    }

    async fn find_payment_by_transaction_key(&self, key: &str) -> Result<Option<Payment>> {
        let records = self.shared.records.lock().await;
        Ok(records
            .payment_by_key
            .get(key)
            .and_then(|id| records.payments.get(id))
            .cloned())
    }

    async fn find_stale_payments(
        &self,
        status: PaymentStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>> {
        let records = self.shared.records.lock().await;
        let mut stale: Vec<Payment> = records
            .payments
            .values()
            .filter(|p| p.status() == status && p.updated_at() < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.updated_at());
        stale.truncate(limit);
        Ok(stale)
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(read_row(&self.shared.products, &id).await)
    }

    async fn find_coupon(&self, id: CouponId) -> Result<Option<Coupon>> {
        Ok(read_row(&self.shared.coupons, &id).await)
    }

    async fn find_wallet(&self, owner: UserId) -> Result<Option<Wallet>> {
        Ok(read_row(&self.shared.wallets, &owner).await)
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        upsert_row(&self.shared.products, product.id(), product).await;
        Ok(())
    }

    async fn upsert_coupon(&self, coupon: &Coupon) -> Result<()> {
        upsert_row(&self.shared.coupons, coupon.id(), coupon).await;
        Ok(())
    }

    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<()> {
        upsert_row(&self.shared.wallets, wallet.owner(), wallet).await;
        Ok(())
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let records = self.shared.records.lock().await;
        Ok(records
            .outbox
            .values()
            .filter(|row| row.status == DeliveryStatus::Pending)
            .take(limit)
            .map(|row| row.entry.clone())
            .collect())
    }

    async fn mark_dispatched(&self, sequence: i64) -> Result<()> {
        let mut records = self.shared.records.lock().await;
        let row = records
            .outbox
            .get_mut(&sequence)
            .ok_or_else(|| StoreError::not_found("outbox entry", sequence))?;
        row.status = DeliveryStatus::Dispatched;
        Ok(())
    }

    async fn record_delivery_failure(
        &self,
        sequence: i64,
        error: &str,
        max_attempts: u32,
    ) -> Result<DeliveryStatus> {
        let mut records = self.shared.records.lock().await;
        let row = records
            .outbox
            .get_mut(&sequence)
            .ok_or_else(|| StoreError::not_found("outbox entry", sequence))?;
        row.entry.attempts += 1;
        row.last_error = Some(error.to_string());
        if row.entry.attempts >= max_attempts {
            row.status = DeliveryStatus::Dead;
        }
        Ok(row.status)
    }

    fn outbox_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.shared.notify)
    }
}

/// A ledger row held by a transaction.
struct Held<T> {
    _guard: OwnedMutexGuard<()>,
    row: Row<T>,
    staged: T,
    dirty: bool,
}

enum Write<T> {
    Insert(T),
    Update { expected: Version, value: T },
}

impl<T> Write<T> {
    fn value(&self) -> &T {
        match self {
            Write::Insert(value) | Write::Update { value, .. } => value,
        }
    }

    fn replace(&mut self, new_value: T) {
        match self {
            Write::Insert(value) | Write::Update { value, .. } => *value = new_value,
        }
    }
}

/// Transaction over an [`InMemoryStore`].
///
/// Ledger locks are held from `lock_*` until the transaction is committed
/// or dropped. Staged writes are applied atomically on commit.
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    products: HashMap<ProductId, Held<Product>>,
    coupons: HashMap<CouponId, Held<Coupon>>,
    wallets: HashMap<UserId, Held<Wallet>>,
    orders: Vec<Write<Order>>,
    payments: Vec<Write<Payment>>,
    events: Vec<SagaEvent>,
}

async fn acquire<K, T>(
    held: &mut HashMap<K, Held<T>>,
    table: &Table<K, T>,
    key: K,
    entity: &'static str,
) -> Result<T>
where
    K: Copy + Eq + Hash + std::fmt::Display,
    T: Clone,
{
    if let Some(existing) = held.get(&key) {
        return Ok(existing.staged.clone());
    }
    let row = table
        .read()
        .await
        .get(&key)
        .cloned()
        .ok_or_else(|| StoreError::not_found(entity, key))?;
    let guard = Arc::clone(&row.lock).lock_owned().await;
    let staged = row.value.read().await.clone();
    held.insert(
        key,
        Held {
            _guard: guard,
            row,
            staged: staged.clone(),
            dirty: false,
        },
    );
    Ok(staged)
}

fn stage<K, T>(held: &mut HashMap<K, Held<T>>, key: K, value: &T, entity: &'static str) -> Result<()>
where
    K: Eq + Hash + std::fmt::Display,
    T: Clone,
{
    let row = held.get_mut(&key).ok_or_else(|| StoreError::NotLocked {
        entity,
        id: key.to_string(),
    })?;
    row.staged = value.clone();
    row.dirty = true;
    Ok(())
}

async fn flush<K, T>(held: &HashMap<K, Held<T>>)
where
    T: Clone,
{
    for row in held.values().filter(|row| row.dirty) {
        *row.row.value.write().await = row.staged.clone();
    }
}

impl InMemoryTransaction {
    fn staged_order(&mut self, id: OrderId) -> Option<&mut Write<Order>> {
        self.orders.iter_mut().find(|w| w.value().id() == id)
    }

    fn staged_payment(&mut self, id: PaymentId) -> Option<&mut Write<Payment>> {
        self.payments.iter_mut().find(|w| w.value().id() == id)
    }

    fn validate(&self, records: &Records) -> Result<()> {
        for write in &self.orders {
            match write {
                Write::Insert(order) if records.orders.contains_key(&order.id()) => {
                    return Err(StoreError::Duplicate {
                        entity: "order",
                        id: order.id().to_string(),
                    });
                }
                Write::Update { expected, value } => {
                    let current = records
                        .orders
                        .get(&value.id())
                        .ok_or_else(|| StoreError::not_found("order", value.id()))?;
                    if current.version() != *expected {
                        return Err(StoreError::ConcurrencyConflict {
                            entity: "order",
                            id: value.id().to_string(),
                            expected: *expected,
                        });
                    }
                }
                Write::Insert(_) => {}
            }
        }

        for write in &self.payments {
            match write {
                Write::Insert(payment) => {
                    if records.payment_by_order.contains_key(&payment.order_id())
                        || records.payments.contains_key(&payment.id())
                    {
                        return Err(StoreError::Duplicate {
                            entity: "payment",
                            id: payment.order_id().to_string(),
                        });
                    }
                }
                Write::Update { expected, value } => {
                    let current = records
                        .payments
                        .get(&value.id())
                        .ok_or_else(|| StoreError::not_found("payment", value.id()))?;
                    if current.version() != *expected {
                        return Err(StoreError::ConcurrencyConflict {
                            entity: "payment",
                            id: value.id().to_string(),
                            expected: *expected,
                        });
                    }
                }
            }
            if let Some(key) = write.value().transaction_key()
                && records
                    .payment_by_key
                    .get(key)
                    .is_some_and(|owner| *owner != write.value().id())
            {
                return Err(StoreError::Duplicate {
                    entity: "transaction key",
                    id: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn lock_product(&mut self, id: ProductId) -> Result<Product> {
        acquire(&mut self.products, &self.shared.products, id, "product").await
    }

    async fn save_product(&mut self, product: &Product) -> Result<()> {
        stage(&mut self.products, product.id(), product, "product")
    }

    async fn lock_coupon(&mut self, id: CouponId) -> Result<Coupon> {
        acquire(&mut self.coupons, &self.shared.coupons, id, "coupon").await
    }

    async fn save_coupon(&mut self, coupon: &Coupon) -> Result<()> {
        stage(&mut self.coupons, coupon.id(), coupon, "coupon")
    }

    async fn lock_wallet(&mut self, owner: UserId) -> Result<Wallet> {
        acquire(&mut self.wallets, &self.shared.wallets, owner, "wallet").await
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        stage(&mut self.wallets, wallet.owner(), wallet, "wallet")
    }

    async fn load_order(&mut self, id: OrderId) -> Result<Order> {
        if let Some(write) = self.staged_order(id) {
            return Ok(write.value().clone());
        }
        self.shared
            .records
            .lock()
            .await
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", id))
    }

    async fn insert_order(&mut self, order: &mut Order) -> Result<()> {
        order.set_version(Version::first());
        self.orders.push(Write::Insert(order.clone()));
        Ok(())
    }

    async fn update_order(&mut self, order: &mut Order) -> Result<()> {
        let expected = order.version();
        order.set_version(expected.next());
        let snapshot = order.clone();
        if let Some(write) = self.staged_order(order.id()) {
            if write.value().version() != expected {
                return Err(StoreError::ConcurrencyConflict {
                    entity: "order",
                    id: order.id().to_string(),
                    expected,
                });
            }
            write.replace(snapshot);
        } else {
            self.orders.push(Write::Update {
                expected,
                value: snapshot,
            });
        }
        Ok(())
    }

    async fn load_payment(&mut self, id: PaymentId) -> Result<Payment> {
        if let Some(write) = self.staged_payment(id) {
            return Ok(write.value().clone());
        }
        self.shared
            .records
            .lock()
            .await
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("payment", id))
    }

    async fn load_payment_by_order(&mut self, order_id: OrderId) -> Result<Option<Payment>> {
        if let Some(write) = self
            .payments
            .iter()
            .find(|w| w.value().order_id() == order_id)
        {
            return Ok(Some(write.value().clone()));
        }
        let records = self.shared.records.lock().await;
        Ok(records
            .payment_by_order
            .get(&order_id)
            .and_then(|id| records.payments.get(id))
            .cloned())
    }

    async fn insert_payment(&mut self, payment: &mut Payment) -> Result<()> {
        if self
            .payments
            .iter()
            .any(|w| w.value().order_id() == payment.order_id())
        {
            return Err(StoreError::Duplicate {
                entity: "payment",
                id: payment.order_id().to_string(),
            });
        }
        payment.set_version(Version::first());
        self.payments.push(Write::Insert(payment.clone()));
        Ok(())
    }

    async fn update_payment(&mut self, payment: &mut Payment) -> Result<()> {
        let expected = payment.version();
        payment.set_version(expected.next());
        let snapshot = payment.clone();
        if let Some(write) = self.staged_payment(payment.id()) {
            if write.value().version() != expected {
                return Err(StoreError::ConcurrencyConflict {
                    entity: "payment",
                    id: payment.id().to_string(),
                    expected,
                });
            }
            write.replace(snapshot);
        } else {
            self.payments.push(Write::Update {
                expected,
                value: snapshot,
            });
        }
        Ok(())
    }

    async fn enqueue(&mut self, event: SagaEvent) -> Result<()> {
        self.events.push(event);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let entries = self
            .events
            .iter()
            .map(OutboxEntry::new)
            .collect::<Result<Vec<_>>>()?;

        let mut records = self.shared.records.lock().await;
        if let Err(err) = self.validate(&records) {
            if err.is_concurrency_conflict() {
                metrics::counter!("store_conflicts_total", "backend" => "memory").increment(1);
            }
            return Err(err);
        }

        // Ledger first so an order is never visible without its reservations.
        flush(&self.products).await;
        flush(&self.coupons).await;
        flush(&self.wallets).await;

        for write in self.orders {
            let order = match write {
                Write::Insert(order) | Write::Update { value: order, .. } => order,
            };
            records.orders.insert(order.id(), order);
        }
        for write in self.payments {
            let payment = match write {
                Write::Insert(payment) | Write::Update { value: payment, .. } => payment,
            };
            records.payment_by_order.insert(payment.order_id(), payment.id());
            if let Some(key) = payment.transaction_key() {
                records.payment_by_key.insert(key.to_string(), payment.id());
            }
            records.payments.insert(payment.id(), payment);
        }

        let published = entries.len();
        for mut entry in entries {
            records.next_sequence += 1;
            entry.sequence = records.next_sequence;
            records.outbox.insert(
                entry.sequence,
                OutboxRow {
                    entry,
                    status: DeliveryStatus::Pending,
                    last_error: None,
                },
            );
        }
        drop(records);

        metrics::counter!("store_commits_total", "backend" => "memory").increment(1);
        if published > 0 {
            tracing::debug!(events = published, "outbox entries committed");
            self.shared.notify.notify_one();
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
