//! Order aggregate and its lifecycle.

mod aggregate;
mod item;
mod status;

pub use aggregate::Order;
pub use item::OrderItem;
pub use status::OrderStatus;
