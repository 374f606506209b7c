//! Shared balances mutated under exclusive row locks.
//!
//! Each entity owns the only legal way to change its balance. Restoring
//! something that was never taken is a no-op so compensation can be
//! delivered more than once.

mod coupon;
mod product;
mod wallet;

pub use coupon::{Coupon, DiscountPolicy};
pub use product::Product;
pub use wallet::Wallet;
