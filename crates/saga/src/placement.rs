//! Order placement.
//!
//! One transaction reserves stock, spends the coupon, writes the order and
//! stages `OrderPlaced`. Either all of it commits or none of it does. The
//! whole transaction is re-run when it loses an optimistic race.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use common::{CouponId, ProductId, UserId};
use domain::{CardDetails, DomainError, Order, OrderItem, OrderPlaced, PaymentMethod, Product};
use store::{Store, Transaction};

use crate::error::{Result, SagaError};
use crate::resilience::{RetryPolicy, with_retry};

/// One requested product line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Command to place an order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub user_id: UserId,
    pub items: Vec<OrderLine>,
    pub payment_method: PaymentMethod,
    pub coupon_id: Option<CouponId>,
    /// Required for card payments, ignored otherwise.
    pub card: Option<CardDetails>,
}

#[derive(Debug, Clone, Default)]
pub struct PlacementConfig {
    /// Applied to optimistic conflicts only.
    pub retry: RetryPolicy,
}

pub struct OrderPlacement<S> {
    store: S,
    config: PlacementConfig,
}

impl<S: Store> OrderPlacement<S> {
    pub fn new(store: S, config: PlacementConfig) -> Self {
        Self { store, config }
    }

    /// Places an order and returns it as committed.
    #[tracing::instrument(
        skip(self, cmd),
        fields(user_id = %cmd.user_id, method = %cmd.payment_method, lines = cmd.items.len())
    )]
    pub async fn place(&self, cmd: PlaceOrder) -> Result<Order> {
        let started = Instant::now();
        let result = self.place_with_retry(&cmd).await;
        metrics::histogram!("order_placement_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_placed_total").increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    final_price = %order.final_price(),
                    "order placed"
                );
            }
            Err(err) => {
                metrics::counter!("orders_rejected_total", "reason" => rejection_reason(err))
                    .increment(1);
                tracing::warn!(error = %err, "order rejected");
            }
        }
        result
    }

    async fn place_with_retry(&self, cmd: &PlaceOrder) -> Result<Order> {
        let card = validate(cmd)?;
        let lines = merge_lines(&cmd.items)?;

        let result = with_retry(&self.config.retry, SagaError::is_retryable, || {
            self.try_place(cmd, &lines, card.clone())
        })
        .await;

        result.map_err(|err| {
            if err.is_retryable() {
                SagaError::RetriesExhausted {
                    attempts: self.config.retry.max_attempts.max(1),
                    source: Box::new(err),
                }
            } else {
                err
            }
        })
    }

    async fn try_place(
        &self,
        cmd: &PlaceOrder,
        lines: &[OrderLine],
        card: Option<CardDetails>,
    ) -> Result<Order> {
        let mut tx = self.store.begin().await?;

        // Lock in key order so two orders over the same products cannot deadlock.
        let by_id: BTreeMap<ProductId, u32> =
            lines.iter().map(|l| (l.product_id, l.quantity)).collect();
        let mut reserved: HashMap<ProductId, Product> = HashMap::with_capacity(by_id.len());
        for (&product_id, &quantity) in &by_id {
            let mut product = tx.lock_product(product_id).await?;
            product.decrease_stock(quantity)?;
            tx.save_product(&product).await?;
            reserved.insert(product_id, product);
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let product = reserved
                .get(&line.product_id)
                .ok_or_else(|| SagaError::not_found("product", line.product_id))?;
            items.push(OrderItem::new(
                line.product_id,
                product.name(),
                product.price(),
                line.quantity,
            )?);
        }

        let mut order = Order::place(cmd.user_id, items, cmd.payment_method)?;

        if let Some(coupon_id) = cmd.coupon_id {
            let mut coupon = tx.lock_coupon(coupon_id).await?;
            coupon.validate_for(cmd.user_id)?;
            let discount = coupon.discount_for(order.original_price());
            coupon.use_for(cmd.user_id, order.id())?;
            tx.save_coupon(&coupon).await?;
            order.apply_discount(coupon_id, discount)?;
        }

        order.mark_stock_as_deducted()?;
        tx.insert_order(&mut order).await?;
        tx.enqueue(OrderPlaced::from_order(&order, card).into())
            .await?;
        tx.commit().await?;

        Ok(order)
    }
}

/// Rejects malformed commands before anything is locked. Returns the card to
/// forward, if the method takes one.
fn validate(cmd: &PlaceOrder) -> Result<Option<CardDetails>> {
    if !cmd.user_id.is_valid() {
        return Err(SagaError::Validation(format!("invalid user id {}", cmd.user_id)));
    }
    if cmd.items.is_empty() {
        return Err(DomainError::EmptyOrder.into());
    }
    for line in &cmd.items {
        if !line.product_id.is_valid() {
            return Err(SagaError::Validation(format!(
                "invalid product id {}",
                line.product_id
            )));
        }
        if line.quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 }.into());
        }
    }
    if let Some(coupon_id) = cmd.coupon_id
        && !coupon_id.is_valid()
    {
        return Err(SagaError::Validation(format!("invalid coupon id {coupon_id}")));
    }

    match cmd.payment_method {
        PaymentMethod::Card => match &cmd.card {
            Some(card) => Ok(Some(card.clone())),
            None => Err(DomainError::MissingCardDetails.into()),
        },
        PaymentMethod::Wallet => Ok(None),
    }
}

/// Folds repeated products into one line each, keeping first-seen order.
fn merge_lines(items: &[OrderLine]) -> Result<Vec<OrderLine>> {
    let mut merged: Vec<OrderLine> = Vec::with_capacity(items.len());
    for line in items {
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(line.quantity).ok_or_else(|| {
                    SagaError::Validation(format!("quantity overflow for product {}", line.product_id))
                })?;
            }
            None => merged.push(*line),
        }
    }
    Ok(merged)
}

fn rejection_reason(err: &SagaError) -> &'static str {
    match err {
        SagaError::Domain(DomainError::InsufficientStock { .. }) => "insufficient_stock",
        SagaError::Domain(DomainError::CouponAlreadyUsed(_))
        | SagaError::Domain(DomainError::CouponNotOwned { .. }) => "coupon",
        e if e.is_validation() => "validation",
        e if e.is_not_found() => "not_found",
        e if e.is_conflict() => "conflict",
        _ => "internal",
    }
}
