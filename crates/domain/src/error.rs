//! Domain error types.

use common::{CouponId, OrderId, PaymentId, ProductId, UserId};
use thiserror::Error;

use crate::order::OrderStatus;
use crate::payment::PaymentStatus;

/// Errors raised by domain invariants.
///
/// Variants fall into three families that callers treat differently:
/// validation errors, resource conflicts and invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Order must contain at least one item")]
    EmptyOrder,

    #[error("Invalid quantity: {quantity}. Quantity must be greater than 0")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid price: {price}. Price must not be negative")]
    NegativePrice { price: i64 },

    #[error("Invalid amount: {amount}. Amount must be greater than 0")]
    InvalidAmount { amount: i64 },

    #[error("Amount overflow: the total is too large to represent")]
    AmountOverflow,

    #[error("Invalid discount policy: {0}")]
    InvalidDiscountPolicy(String),

    #[error("Invalid card number")]
    InvalidCardNumber,

    #[error("Card details are required for card payments")]
    MissingCardDetails,

    #[error("Coupon already applied to order {order_id}")]
    CouponAlreadyApplied { order_id: OrderId },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Insufficient balance for user {user_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        user_id: UserId,
        requested: i64,
        available: i64,
    },

    #[error("Coupon {0} has already been used")]
    CouponAlreadyUsed(CouponId),

    #[error("Coupon {coupon_id} does not belong to user {user_id}")]
    CouponNotOwned { coupon_id: CouponId, user_id: UserId },

    #[error("Cannot move order {order_id} from {from} to {to}")]
    InvalidOrderTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Cannot move payment {payment_id} from {from} to {to}")]
    InvalidPaymentTransition {
        payment_id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Stock for order {0} was already marked as deducted")]
    StockAlreadyDeducted(OrderId),

    #[error("Payment {payment_id} already has transaction key {existing}")]
    TransactionKeyMismatch {
        payment_id: PaymentId,
        existing: String,
    },
}

impl DomainError {
    /// Malformed input, rejected before any side effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::EmptyOrder
                | DomainError::InvalidQuantity { .. }
                | DomainError::NegativePrice { .. }
                | DomainError::InvalidAmount { .. }
                | DomainError::AmountOverflow
                | DomainError::InvalidDiscountPolicy(_)
                | DomainError::InvalidCardNumber
                | DomainError::MissingCardDetails
                | DomainError::CouponAlreadyApplied { .. }
        )
    }

    /// A shared resource could not satisfy the request.
    pub fn is_resource_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::InsufficientStock { .. }
                | DomainError::InsufficientBalance { .. }
                | DomainError::CouponAlreadyUsed(_)
                | DomainError::CouponNotOwned { .. }
        )
    }

    /// A state machine rule was broken.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidOrderTransition { .. }
                | DomainError::InvalidPaymentTransition { .. }
                | DomainError::StockAlreadyDeducted(_)
                | DomainError::TransactionKeyMismatch { .. }
        )
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_exclusive() {
        let errors = [
            DomainError::EmptyOrder,
            DomainError::AmountOverflow,
            DomainError::InsufficientStock {
                product_id: ProductId::new(1),
                requested: 2,
                available: 1,
            },
            DomainError::StockAlreadyDeducted(OrderId::new()),
        ];
        for err in errors {
            let families = [
                err.is_validation(),
                err.is_resource_conflict(),
                err.is_invalid_transition(),
            ];
            assert_eq!(families.iter().filter(|f| **f).count(), 1, "{err}");
        }
    }

    #[test]
    fn test_coupon_errors_are_resource_conflicts() {
        assert!(DomainError::CouponAlreadyUsed(CouponId::new(1)).is_resource_conflict());
        assert!(
            DomainError::CouponNotOwned {
                coupon_id: CouponId::new(1),
                user_id: UserId::new(2),
            }
            .is_resource_conflict()
        );
    }
}
