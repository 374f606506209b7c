//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{CouponId, OrderId, ProductId, UserId, Version};
use domain::{
    CardDetails, CardType, Coupon, DiscountPolicy, Money, Order, OrderFailed, OrderItem,
    OrderStatus, Payment, PaymentMethod, PaymentStatus, Product, SagaEvent, Wallet,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{DeliveryStatus, PostgresStore, Store, StoreError, Transaction};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_saga_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh store with its own pool, cleared tables and a small catalog.
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE products, coupons, wallets, orders, payments, outbox")
        .execute(&pool)
        .await
        .unwrap();

    let store = PostgresStore::new(pool);
    store
        .upsert_product(
            &Product::new(ProductId::new(1), "Keyboard", Money::new(1000), 10)
                .unwrap()
                .with_brand(2),
        )
        .await
        .unwrap();
    store
        .upsert_coupon(&Coupon::new(
            CouponId::new(1),
            "Percent",
            UserId::new(1),
            DiscountPolicy::percentage(10).unwrap(),
        ))
        .await
        .unwrap();
    store
        .upsert_wallet(&Wallet::new(UserId::new(1), Money::new(5000)).unwrap())
        .await
        .unwrap();
    store
}

fn order() -> Order {
    let item = OrderItem::new(ProductId::new(1), "Keyboard", Money::new(1000), 2).unwrap();
    Order::place(UserId::new(1), vec![item], PaymentMethod::Card).unwrap()
}

fn card_payment(order_id: OrderId) -> Payment {
    Payment::create(
        order_id,
        UserId::new(1),
        PaymentMethod::Card,
        Money::new(2000),
        Some(CardDetails::new(CardType::Samsung, "1234-5678-9814-1451").unwrap()),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn catalog_rows_round_trip() {
    let store = get_test_store().await;

    let product = store.find_product(ProductId::new(1)).await.unwrap().unwrap();
    assert_eq!(product.stock(), 10);
    assert_eq!(product.brand_id(), Some(2));

    let coupon = store.find_coupon(CouponId::new(1)).await.unwrap().unwrap();
    assert_eq!(coupon.policy(), DiscountPolicy::percentage(10).unwrap());
    assert!(!coupon.is_used());

    let wallet = store.find_wallet(UserId::new(1)).await.unwrap().unwrap();
    assert_eq!(wallet.balance(), Money::new(5000));

    assert!(store.find_product(ProductId::new(99)).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn ledger_changes_commit_atomically_with_order() {
    let store = get_test_store().await;
    let mut order = order();

    let mut tx = store.begin().await.unwrap();
    let mut product = tx.lock_product(ProductId::new(1)).await.unwrap();
    product.decrease_stock(2).unwrap();
    tx.save_product(&product).await.unwrap();

    let mut coupon = tx.lock_coupon(CouponId::new(1)).await.unwrap();
    coupon.use_for(UserId::new(1), order.id()).unwrap();
    tx.save_coupon(&coupon).await.unwrap();

    tx.insert_order(&mut order).await.unwrap();
    tx.commit().await.unwrap();

    let stored = store.find_order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.version(), Version::first());
    assert_eq!(stored.status(), OrderStatus::Pending);
    assert_eq!(
        store.find_product(ProductId::new(1)).await.unwrap().unwrap().stock(),
        8
    );
    let coupon = store.find_coupon(CouponId::new(1)).await.unwrap().unwrap();
    assert_eq!(coupon.used_by_order(), Some(order.id()));
}

#[tokio::test]
#[serial]
async fn rollback_discards_everything() {
    let store = get_test_store().await;
    let mut order = order();

    let mut tx = store.begin().await.unwrap();
    let mut wallet = tx.lock_wallet(UserId::new(1)).await.unwrap();
    wallet.deduct(Money::new(5000)).unwrap();
    tx.save_wallet(&wallet).await.unwrap();
    tx.insert_order(&mut order).await.unwrap();
    tx.enqueue(SagaEvent::from(OrderFailed {
        order_id: order.id(),
    }))
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    assert!(store.find_order(order.id()).await.unwrap().is_none());
    assert_eq!(
        store.find_wallet(UserId::new(1)).await.unwrap().unwrap().balance(),
        Money::new(5000)
    );
    assert!(store.pending_events(10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn for_update_blocks_concurrent_locker() {
    let store = get_test_store().await;

    let mut first = store.begin().await.unwrap();
    let mut product = first.lock_product(ProductId::new(1)).await.unwrap();

    let contender = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            let product = tx.lock_product(ProductId::new(1)).await.unwrap();
            tx.commit().await.unwrap();
            product.stock()
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!contender.is_finished());

    product.decrease_stock(10).unwrap();
    first.save_product(&product).await.unwrap();
    first.commit().await.unwrap();

    assert_eq!(contender.await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn stale_order_update_conflicts() {
    let store = get_test_store().await;
    let mut order = order();
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&mut order).await.unwrap();
    tx.commit().await.unwrap();

    let mut stale = order.clone();

    let mut tx = store.begin().await.unwrap();
    order.complete().unwrap();
    tx.update_order(&mut order).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(order.version(), Version::new(2));

    let mut tx = store.begin().await.unwrap();
    stale.fail().unwrap();
    let err = tx.update_order(&mut stale).await.unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert!(err.is_retryable());
    assert_eq!(stale.version(), Version::first());
}

#[tokio::test]
#[serial]
async fn one_payment_per_order() {
    let store = get_test_store().await;
    let order_id = OrderId::new();

    let mut tx = store.begin().await.unwrap();
    tx.insert_payment(&mut card_payment(order_id)).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .insert_payment(&mut card_payment(order_id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));
}

#[tokio::test]
#[serial]
async fn payment_queries() {
    let store = get_test_store().await;
    let mut payment = card_payment(OrderId::new());

    let mut tx = store.begin().await.unwrap();
    tx.insert_payment(&mut payment).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    payment.assign_transaction_key("20250101:TR:9577c5").unwrap();
    payment.transition_to(PaymentStatus::Pending, None).unwrap();
    tx.update_payment(&mut payment).await.unwrap();
    tx.commit().await.unwrap();

    let by_key = store
        .find_payment_by_transaction_key("20250101:TR:9577c5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_key.id(), payment.id());
    assert_eq!(by_key.status(), PaymentStatus::Pending);
    assert_eq!(by_key.version(), Version::new(2));

    let by_order = store
        .find_payment_by_order(payment.order_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_order.id(), payment.id());

    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    let stale = store
        .find_stale_payments(PaymentStatus::Pending, cutoff, 10)
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert!(
        store
            .find_stale_payments(PaymentStatus::Created, cutoff, 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[serial]
async fn outbox_delivery_lifecycle() {
    let store = get_test_store().await;
    let order_id = OrderId::new();

    let mut tx = store.begin().await.unwrap();
    tx.enqueue(SagaEvent::from(OrderFailed { order_id }))
        .await
        .unwrap();
    tx.enqueue(SagaEvent::from(OrderFailed { order_id }))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let pending = store.pending_events(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending[0].sequence < pending[1].sequence);
    assert_eq!(
        pending[0].decode().unwrap(),
        SagaEvent::from(OrderFailed { order_id })
    );

    store.mark_dispatched(pending[0].sequence).await.unwrap();
    let status = store
        .record_delivery_failure(pending[1].sequence, "handler down", 1)
        .await
        .unwrap();
    assert_eq!(status, DeliveryStatus::Dead);
    assert!(store.pending_events(10).await.unwrap().is_empty());

    assert!(store.mark_dispatched(9_999).await.unwrap_err().is_not_found());
}
