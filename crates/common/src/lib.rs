//! Identifiers and version counters shared by every crate in the workspace.

pub mod ids;
pub mod version;

pub use ids::{CouponId, EventId, OrderId, PaymentId, ProductId, UserId};
pub use version::Version;
