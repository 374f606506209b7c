//! Persistence for the order and payment saga.
//!
//! A [`Store`] hands out [`Transaction`]s. Inside one:
//! - ledger rows (products, coupons, wallets) are taken with exclusive
//!   locks held until commit or rollback
//! - orders and payments are written optimistically against their version
//! - events are staged in the outbox and become visible only on commit

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use outbox::{DeliveryStatus, OutboxEntry};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use store::{Store, Transaction};
