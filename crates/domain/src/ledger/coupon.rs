use common::{CouponId, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::money::Money;

/// How a coupon reduces an order's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountPolicy {
    /// A flat amount, capped at the original price.
    Fixed { amount: Money },
    /// A percentage between 1 and 100, rounded half-up.
    Percentage { rate: u32 },
}

impl DiscountPolicy {
    pub fn fixed(amount: Money) -> Result<Self> {
        if !amount.is_positive() {
            return Err(DomainError::InvalidDiscountPolicy(format!(
                "fixed discount must be positive, got {amount}"
            )));
        }
        Ok(Self::Fixed { amount })
    }

    pub fn percentage(rate: u32) -> Result<Self> {
        if !(1..=100).contains(&rate) {
            return Err(DomainError::InvalidDiscountPolicy(format!(
                "percentage must be between 1 and 100, got {rate}"
            )));
        }
        Ok(Self::Percentage { rate })
    }

    /// Discount this policy grants on `original`. Never exceeds `original`.
    pub fn discount_for(&self, original: Money) -> Money {
        match *self {
            DiscountPolicy::Fixed { amount } => amount.min(original),
            DiscountPolicy::Percentage { rate } => original
                .percent_half_up(rate)
                .map_or(original, |discount| discount.min(original)),
        }
    }
}

/// A single-use discount coupon issued to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    id: CouponId,
    name: String,
    owner: UserId,
    policy: DiscountPolicy,
    used: bool,
    used_by_order: Option<OrderId>,
}

impl Coupon {
    /// Issues an unused coupon.
    pub fn new(id: CouponId, name: impl Into<String>, owner: UserId, policy: DiscountPolicy) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            policy,
            used: false,
            used_by_order: None,
        }
    }

    /// Rebuilds a coupon from persisted columns.
    pub fn from_parts(
        id: CouponId,
        name: impl Into<String>,
        owner: UserId,
        policy: DiscountPolicy,
        used: bool,
        used_by_order: Option<OrderId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            policy,
            used,
            used_by_order,
        }
    }

    pub fn id(&self) -> CouponId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn policy(&self) -> DiscountPolicy {
        self.policy
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    /// The order that consumed this coupon, if any.
    pub fn used_by_order(&self) -> Option<OrderId> {
        self.used_by_order
    }

    /// Checks the coupon can be spent by `user`.
    pub fn validate_for(&self, user: UserId) -> Result<()> {
        if self.used {
            return Err(DomainError::CouponAlreadyUsed(self.id));
        }
        if self.owner != user {
            return Err(DomainError::CouponNotOwned {
                coupon_id: self.id,
                user_id: user,
            });
        }
        Ok(())
    }

    /// Discount for an order of `original` value.
    pub fn discount_for(&self, original: Money) -> Money {
        self.policy.discount_for(original)
    }

    /// Spends the coupon on `order_id`.
    pub fn use_for(&mut self, user: UserId, order_id: OrderId) -> Result<()> {
        self.validate_for(user)?;
        self.used = true;
        self.used_by_order = Some(order_id);
        Ok(())
    }

    /// Returns the coupon to unused if `order_id` is the order that spent it.
    ///
    /// Returns `false` when there was nothing to restore: the coupon is
    /// already unused or it now belongs to a different order.
    pub fn restore_for(&mut self, order_id: OrderId) -> bool {
        if !self.used {
            return false;
        }
        if self.used_by_order.is_some_and(|owner| owner != order_id) {
            return false;
        }
        self.used = false;
        self.used_by_order = None;
        true
    }
}
