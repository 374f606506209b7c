//! Payment aggregate, its state machine and method-specific details.

mod aggregate;
mod method;
mod status;

pub use aggregate::Payment;
pub use method::{CardDetails, CardType, PaymentMethod};
pub use status::PaymentStatus;
