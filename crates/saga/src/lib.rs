//! Checkout saga: order placement, payment and compensation.
//!
//! An order moves through these local transactions, linked by events
//! relayed from the store's outbox:
//! 1. Placement reserves stock, spends the coupon and writes the order
//!    (`OrderPlaced`)
//! 2. The payment is created and run by the processor for its method
//!    (`PaymentProcessed`)
//! 3. The order follows its payment; an unpaid order publishes `OrderFailed`
//! 4. Compensation puts stock back and returns the coupon
//!
//! Card payments that stall are picked up again by reconciliation.

pub mod bus;
pub mod compensation;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod payments;
pub mod placement;
pub mod processor;
pub mod reconciliation;
pub mod recorder;
pub mod resilience;
pub mod runtime;
pub mod sync;

pub use bus::{BusConfig, EventBus};
pub use compensation::{CouponCompensation, StockCompensation};
pub use error::{Result, SagaError};
pub use gateway::{
    GatewayError, GatewayTransaction, HttpGatewayConfig, HttpPaymentGateway,
    InMemoryPaymentGateway, PaymentGateway, PaymentRequest, ResilientGateway, SimulatedOutcome,
    TransactionStatus,
};
pub use handlers::EventHandler;
pub use payments::{PaymentCallback, PaymentService};
pub use placement::{OrderLine, OrderPlacement, PlaceOrder, PlacementConfig};
pub use processor::{CardProcessor, PaymentProcessor, ProcessorRegistry, WalletProcessor};
pub use reconciliation::{ReconciliationConfig, ReconciliationScheduler, SweepReport};
pub use recorder::{PaymentRecorder, StatusUpdate};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use runtime::{CheckoutSaga, DEFAULT_CALLBACK_URL, SagaConfig};
pub use sync::{OrderStatusSync, order_status_for};
