use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CouponId, EventId, OrderId, PaymentId, ProductId, UserId, Version};
use domain::{
    Coupon, DiscountPolicy, Money, Order, Payment, PaymentStatus, Product, SagaEvent, Wallet,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    DeliveryStatus, OutboxEntry, Result, StoreError,
    store::{Store, Transaction},
};

const PRODUCT_COLUMNS: &str = "id, name, price, stock, brand_id, like_count";
const COUPON_COLUMNS: &str = "id, name, owner_id, policy, is_used, used_by_order";
const OUTBOX_COLUMNS: &str = "sequence, event_id, event_type, order_id, payload, attempts, created_at";

/// PostgreSQL-backed store.
///
/// Ledger locks are `SELECT ... FOR UPDATE`; orders and payments are JSONB
/// documents guarded by a `version` column.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    notify: Arc<Notify>,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    let id: i64 = row.try_get("id")?;
    let stock: i64 = row.try_get("stock")?;
    let stock = u32::try_from(stock).map_err(|e| StoreError::corrupt("product", id, e))?;
    let like_count: i64 = row.try_get("like_count")?;
    let like_count =
        u64::try_from(like_count).map_err(|e| StoreError::corrupt("product", id, e))?;

    let mut product = Product::new(
        ProductId::new(id),
        row.try_get::<String, _>("name")?,
        Money::new(row.try_get("price")?),
        stock,
    )
    .map_err(|e| StoreError::corrupt("product", id, e))?
    .with_like_count(like_count);
    if let Some(brand_id) = row.try_get::<Option<i64>, _>("brand_id")? {
        product = product.with_brand(brand_id);
    }
    Ok(product)
}

fn row_to_coupon(row: &PgRow) -> Result<Coupon> {
    let policy: DiscountPolicy = serde_json::from_value(row.try_get("policy")?)?;
    Ok(Coupon::from_parts(
        CouponId::new(row.try_get("id")?),
        row.try_get::<String, _>("name")?,
        UserId::new(row.try_get("owner_id")?),
        policy,
        row.try_get("is_used")?,
        row.try_get::<Option<Uuid>, _>("used_by_order")?
            .map(OrderId::from_uuid),
    ))
}

fn row_to_wallet(row: &PgRow) -> Result<Wallet> {
    let user_id: i64 = row.try_get("user_id")?;
    Wallet::new(UserId::new(user_id), Money::new(row.try_get("balance")?))
        .map_err(|e| StoreError::corrupt("wallet", user_id, e))
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let mut order: Order = serde_json::from_value(row.try_get("state")?)?;
    order.set_version(Version::new(row.try_get("version")?));
    Ok(order)
}

fn row_to_payment(row: &PgRow) -> Result<Payment> {
    let mut payment: Payment = serde_json::from_value(row.try_get("state")?)?;
    payment.set_version(Version::new(row.try_get("version")?));
    Ok(payment)
}

fn row_to_outbox(row: &PgRow) -> Result<OutboxEntry> {
    let sequence: i64 = row.try_get("sequence")?;
    let attempts: i32 = row.try_get("attempts")?;
    Ok(OutboxEntry {
        sequence,
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        event_type: row.try_get("event_type")?,
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        payload: row.try_get("payload")?,
        attempts: u32::try_from(attempts)
            .map_err(|e| StoreError::corrupt("outbox entry", sequence, e))?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_delivery_status(sequence: i64, raw: &str) -> Result<DeliveryStatus> {
    match raw {
        "PENDING" => Ok(DeliveryStatus::Pending),
        "DISPATCHED" => Ok(DeliveryStatus::Dispatched),
        "DEAD" => Ok(DeliveryStatus::Dead),
        other => Err(StoreError::corrupt(
            "outbox entry",
            sequence,
            format!("unknown status {other}"),
        )),
    }
}

/// Maps a unique violation to `Duplicate`, anything else to `Database`.
fn map_unique(err: sqlx::Error, entity: &'static str, id: impl ToString) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return StoreError::Duplicate {
            entity,
            id: id.to_string(),
        };
    }
    StoreError::Database(err)
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
            notify: Arc::clone(&self.notify),
            enqueued: 0,
        })
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        sqlx::query("SELECT state, version FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_order)
            .transpose()
    }

    async fn find_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        sqlx::query("SELECT state, version FROM payments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_payment)
            .transpose()
    }

    async fn find_payment_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        sqlx::query("SELECT state, version FROM payments WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_payment)
            .transpose()
    }

    async fn find_payment_by_transaction_key(&self, key: &str) -> Result<Option<Payment>> {
        sqlx::query("SELECT state, version FROM payments WHERE transaction_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_payment)
            .transpose()
    }

    async fn find_stale_payments(
        &self,
        status: PaymentStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT state, version
            FROM payments
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
        )
        .bind(status.as_str())
        .bind(updated_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payment).collect()
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>> {
        sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_product)
            .transpose()
    }

    async fn find_coupon(&self, id: CouponId) -> Result<Option<Coupon>> {
        sqlx::query(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_coupon)
            .transpose()
    }

    async fn find_wallet(&self, owner: UserId) -> Result<Option<Wallet>> {
        sqlx::query("SELECT user_id, balance FROM wallets WHERE user_id = $1")
            .bind(owner.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_wallet)
            .transpose()
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price, stock, brand_id, like_count)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                stock = EXCLUDED.stock,
                brand_id = EXCLUDED.brand_id,
                like_count = EXCLUDED.like_count
            "#,
        )
        .bind(product.id().as_i64())
        .bind(product.name())
        .bind(product.price().amount())
        .bind(i64::from(product.stock()))
        .bind(product.brand_id())
        .bind(product.like_count() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_coupon(&self, coupon: &Coupon) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, name, owner_id, policy, is_used, used_by_order)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                owner_id = EXCLUDED.owner_id,
                policy = EXCLUDED.policy,
                is_used = EXCLUDED.is_used,
                used_by_order = EXCLUDED.used_by_order
            "#,
        )
        .bind(coupon.id().as_i64())
        .bind(coupon.name())
        .bind(coupon.owner().as_i64())
        .bind(serde_json::to_value(coupon.policy())?)
        .bind(coupon.is_used())
        .bind(coupon.used_by_order().map(|id| id.as_uuid()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, balance) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET balance = EXCLUDED.balance
            "#,
        )
        .bind(wallet.owner().as_i64())
        .bind(wallet.balance().amount())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE status = 'PENDING' ORDER BY sequence ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_outbox).collect()
    }

    async fn mark_dispatched(&self, sequence: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'DISPATCHED', dispatched_at = NOW() WHERE sequence = $1",
        )
        .bind(sequence)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("outbox entry", sequence));
        }
        Ok(())
    }

    async fn record_delivery_failure(
        &self,
        sequence: i64,
        error: &str,
        max_attempts: u32,
    ) -> Result<DeliveryStatus> {
        let row = sqlx::query(
            r#"
            UPDATE outbox SET
                attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $3 THEN 'DEAD' ELSE status END
            WHERE sequence = $1
            RETURNING status
            "#,
        )
        .bind(sequence)
        .bind(error)
        .bind(max_attempts as i32)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("outbox entry", sequence))?;

        let status: String = row.try_get("status")?;
        parse_delivery_status(sequence, &status)
    }

    fn outbox_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}

/// Transaction over a [`PostgresStore`].
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    notify: Arc<Notify>,
    enqueued: usize,
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn lock_product(&mut self, id: ProductId) -> Result<Product> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("product", id))?;
        row_to_product(&row)
    }

    async fn save_product(&mut self, product: &Product) -> Result<()> {
        let result = sqlx::query("UPDATE products SET stock = $2 WHERE id = $1")
            .bind(product.id().as_i64())
            .bind(i64::from(product.stock()))
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("product", product.id()));
        }
        Ok(())
    }

    async fn lock_coupon(&mut self, id: CouponId) -> Result<Coupon> {
        let row = sqlx::query(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("coupon", id))?;
        row_to_coupon(&row)
    }

    async fn save_coupon(&mut self, coupon: &Coupon) -> Result<()> {
        let result =
            sqlx::query("UPDATE coupons SET is_used = $2, used_by_order = $3 WHERE id = $1")
                .bind(coupon.id().as_i64())
                .bind(coupon.is_used())
                .bind(coupon.used_by_order().map(|id| id.as_uuid()))
                .execute(&mut *self.tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("coupon", coupon.id()));
        }
        Ok(())
    }

    async fn lock_wallet(&mut self, owner: UserId) -> Result<Wallet> {
        let row = sqlx::query("SELECT user_id, balance FROM wallets WHERE user_id = $1 FOR UPDATE")
            .bind(owner.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::not_found("wallet", owner))?;
        row_to_wallet(&row)
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET balance = $2 WHERE user_id = $1")
            .bind(wallet.owner().as_i64())
            .bind(wallet.balance().amount())
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("wallet", wallet.owner()));
        }
        Ok(())
    }

    async fn load_order(&mut self, id: OrderId) -> Result<Order> {
        let row = sqlx::query("SELECT state, version FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::not_found("order", id))?;
        row_to_order(&row)
    }

    async fn insert_order(&mut self, order: &mut Order) -> Result<()> {
        order.set_version(Version::first());
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, version, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_i64())
        .bind(order.status().as_str())
        .bind(order.version().as_i64())
        .bind(serde_json::to_value(&*order)?)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_unique(e, "order", order.id()))?;
        Ok(())
    }

    async fn update_order(&mut self, order: &mut Order) -> Result<()> {
        let expected = order.version();
        order.set_version(expected.next());
        let result = sqlx::query(
            r#"
            UPDATE orders SET status = $2, version = $3, state = $4, updated_at = $5
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.version().as_i64())
        .bind(serde_json::to_value(&*order)?)
        .bind(order.updated_at())
        .bind(expected.as_i64())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            order.set_version(expected);
            metrics::counter!("store_conflicts_total", "backend" => "postgres").increment(1);
            return Err(StoreError::ConcurrencyConflict {
                entity: "order",
                id: order.id().to_string(),
                expected,
            });
        }
        Ok(())
    }

    async fn load_payment(&mut self, id: PaymentId) -> Result<Payment> {
        let row = sqlx::query("SELECT state, version FROM payments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::not_found("payment", id))?;
        row_to_payment(&row)
    }

    async fn load_payment_by_order(&mut self, order_id: OrderId) -> Result<Option<Payment>> {
        sqlx::query("SELECT state, version FROM payments WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(row_to_payment)
            .transpose()
    }

    async fn insert_payment(&mut self, payment: &mut Payment) -> Result<()> {
        payment.set_version(Version::first());
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, transaction_key, status, version, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id().as_uuid())
        .bind(payment.order_id().as_uuid())
        .bind(payment.transaction_key())
        .bind(payment.status().as_str())
        .bind(payment.version().as_i64())
        .bind(serde_json::to_value(&*payment)?)
        .bind(payment.created_at())
        .bind(payment.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_unique(e, "payment", payment.order_id()))?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &mut Payment) -> Result<()> {
        let expected = payment.version();
        payment.set_version(expected.next());
        let result = sqlx::query(
            r#"
            UPDATE payments SET transaction_key = $2, status = $3, version = $4, state = $5, updated_at = $6
            WHERE id = $1 AND version = $7
            "#,
        )
        .bind(payment.id().as_uuid())
        .bind(payment.transaction_key())
        .bind(payment.status().as_str())
        .bind(payment.version().as_i64())
        .bind(serde_json::to_value(&*payment)?)
        .bind(payment.updated_at())
        .bind(expected.as_i64())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_unique(e, "transaction key", payment.transaction_key().unwrap_or_default()))?;

        if result.rows_affected() == 0 {
            payment.set_version(expected);
            metrics::counter!("store_conflicts_total", "backend" => "postgres").increment(1);
            return Err(StoreError::ConcurrencyConflict {
                entity: "payment",
                id: payment.id().to_string(),
                expected,
            });
        }
        Ok(())
    }

    async fn enqueue(&mut self, event: SagaEvent) -> Result<()> {
        let entry = OutboxEntry::new(&event)?;
        sqlx::query(
            r#"
            INSERT INTO outbox (event_id, event_type, order_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.event_id.as_uuid())
        .bind(&entry.event_type)
        .bind(entry.order_id.as_uuid())
        .bind(&entry.payload)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        self.enqueued += 1;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        metrics::counter!("store_commits_total", "backend" => "postgres").increment(1);
        if self.enqueued > 0 {
            tracing::debug!(events = self.enqueued, "outbox entries committed");
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
