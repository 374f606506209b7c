//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{CouponId, OrderId, UserId, Version};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::money::Money;
use crate::payment::PaymentMethod;

use super::{OrderItem, OrderStatus};

/// Order aggregate root.
///
/// Created in `Pending` by order placement with its stock and coupon
/// reservations already held. Afterwards it only moves through the status
/// machine and the stock-deducted flag; it is never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    status: OrderStatus,
    payment_method: PaymentMethod,
    original_price: Money,
    final_price: Money,
    applied_coupon_id: Option<CouponId>,

    /// Whether restoring stock is still owed on failure.
    stock_deducted: bool,

    #[serde(default)]
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order from item snapshots.
    pub fn place(
        user_id: UserId,
        items: Vec<OrderItem>,
        payment_method: PaymentMethod,
    ) -> Result<Self> {
        if items.is_empty() {
            return Err(DomainError::EmptyOrder);
        }
        let original_price = items.iter().try_fold(Money::zero(), |total, item| {
            total
                .checked_add(item.subtotal()?)
                .ok_or(DomainError::AmountOverflow)
        })?;
        let now = Utc::now();

        Ok(Self {
            id: OrderId::new(),
            user_id,
            items,
            status: OrderStatus::Pending,
            payment_method,
            original_price,
            final_price: original_price,
            applied_coupon_id: None,
            stock_deducted: false,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        })
    }
}

// Queries
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    /// Sum of item subtotals.
    pub fn original_price(&self) -> Money {
        self.original_price
    }

    /// Amount to charge after the discount.
    pub fn final_price(&self) -> Money {
        self.final_price
    }

    pub fn discount(&self) -> Money {
        self.original_price.minus_floor_zero(self.final_price)
    }

    pub fn applied_coupon_id(&self) -> Option<CouponId> {
        self.applied_coupon_id
    }

    pub fn is_stock_deducted(&self) -> bool {
        self.stock_deducted
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Set by the store after a successful write.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Mutations
impl Order {
    /// Applies a coupon's discount. An order carries at most one coupon.
    pub fn apply_discount(&mut self, coupon_id: CouponId, discount: Money) -> Result<()> {
        self.ensure_pending()?;
        if self.applied_coupon_id.is_some() {
            return Err(DomainError::CouponAlreadyApplied { order_id: self.id });
        }
        if discount.is_negative() {
            return Err(DomainError::InvalidAmount {
                amount: discount.amount(),
            });
        }
        self.applied_coupon_id = Some(coupon_id);
        self.final_price = self.original_price.minus_floor_zero(discount);
        self.touch();
        Ok(())
    }

    /// Records that stock was taken for this order. Calling it twice is a bug.
    pub fn mark_stock_as_deducted(&mut self) -> Result<()> {
        if self.stock_deducted {
            return Err(DomainError::StockAlreadyDeducted(self.id));
        }
        self.stock_deducted = true;
        self.touch();
        Ok(())
    }

    /// Clears the owed-restore flag. Returns `false` if nothing was owed.
    pub fn mark_stock_as_restored(&mut self) -> bool {
        if !self.stock_deducted {
            return false;
        }
        self.stock_deducted = false;
        self.touch();
        true
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(OrderStatus::Completed)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(OrderStatus::Cancelled)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition(OrderStatus::Failed)
    }

    fn transition(&mut self, to: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidOrderTransition {
                order_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    // Pricing is frozen once the order leaves Pending.
    fn ensure_pending(&self) -> Result<()> {
        if self.status != OrderStatus::Pending {
            return Err(DomainError::InvalidOrderTransition {
                order_id: self.id,
                from: self.status,
                to: OrderStatus::Pending,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    fn items() -> Vec<OrderItem> {
        vec![
            OrderItem::new(ProductId::new(1), "Keyboard", Money::new(1000), 2).unwrap(),
            OrderItem::new(ProductId::new(2), "Mouse", Money::new(500), 1).unwrap(),
        ]
    }

    fn pending() -> Order {
        Order::place(UserId::new(1), items(), PaymentMethod::Wallet).unwrap()
    }

    #[test]
    fn test_place_computes_prices() {
        let order = pending();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.original_price(), Money::new(2500));
        assert_eq!(order.final_price(), Money::new(2500));
        assert_eq!(order.version(), Version::initial());
        assert!(!order.is_stock_deducted());
    }

    #[test]
    fn test_place_requires_items() {
        let err = Order::place(UserId::new(1), vec![], PaymentMethod::Card).unwrap_err();
        assert_eq!(err, DomainError::EmptyOrder);
    }

    #[test]
    fn test_apply_discount() {
        let mut order = pending();
        order.apply_discount(CouponId::new(7), Money::new(300)).unwrap();
        assert_eq!(order.final_price(), Money::new(2200));
        assert_eq!(order.discount(), Money::new(300));
        assert_eq!(order.applied_coupon_id(), Some(CouponId::new(7)));
    }

    #[test]
    fn test_discount_larger_than_price_floors_at_zero() {
        let mut order = pending();
        order.apply_discount(CouponId::new(7), Money::new(9999)).unwrap();
        assert_eq!(order.final_price(), Money::zero());
    }

    #[test]
    fn test_second_coupon_rejected() {
        let mut order = pending();
        order.apply_discount(CouponId::new(7), Money::new(100)).unwrap();
        let err = order.apply_discount(CouponId::new(8), Money::new(100)).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_stock_flag() {
        let mut order = pending();
        assert!(!order.mark_stock_as_restored());

        order.mark_stock_as_deducted().unwrap();
        assert!(order.is_stock_deducted());
        assert!(order.mark_stock_as_deducted().unwrap_err().is_invalid_transition());

        assert!(order.mark_stock_as_restored());
        assert!(!order.mark_stock_as_restored());
    }

    #[test]
    fn test_terminal_transitions() {
        let mut order = pending();
        order.complete().unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);

        let err = order.fail().unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidOrderTransition {
                order_id: order.id(),
                from: OrderStatus::Completed,
                to: OrderStatus::Failed,
            }
        );
    }

    #[test]
    fn test_cancelled_cannot_complete() {
        let mut order = pending();
        order.cancel().unwrap();
        assert!(order.complete().unwrap_err().is_invalid_transition());
    }

    #[test]
    fn test_serialization_keeps_state() {
        let mut order = pending();
        order.mark_stock_as_deducted().unwrap();
        order.set_version(Version::new(3));
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back, order);
    }
}
