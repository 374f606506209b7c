//! Domain layer for the order and payment saga.
//!
//! This crate provides:
//! - Ledger entities (`Product`, `Coupon`, `Wallet`) whose balances change
//!   only through their own methods
//! - The `Order` aggregate and its status machine
//! - The `Payment` aggregate with an allow-list state machine
//! - Saga events exchanged through the outbox

pub mod error;
pub mod events;
pub mod ledger;
pub mod money;
pub mod order;
pub mod payment;

pub use error::{DomainError, Result};
pub use events::{DomainEvent, OrderFailed, OrderPlaced, PaymentProcessed, SagaEvent};
pub use ledger::{Coupon, DiscountPolicy, Product, Wallet};
pub use money::Money;
pub use order::{Order, OrderItem, OrderStatus};
pub use payment::{CardDetails, CardType, Payment, PaymentMethod, PaymentStatus};
