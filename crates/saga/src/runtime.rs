//! Wiring of the saga around one store and one gateway.

use std::sync::Arc;

use store::Store;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{BusConfig, EventBus};
use crate::compensation::{CouponCompensation, StockCompensation};
use crate::gateway::PaymentGateway;
use crate::payments::PaymentService;
use crate::placement::{OrderPlacement, PlacementConfig};
use crate::processor::{CardProcessor, ProcessorRegistry, WalletProcessor};
use crate::reconciliation::{ReconciliationConfig, ReconciliationScheduler};
use crate::resilience::RetryPolicy;
use crate::sync::OrderStatusSync;

pub const DEFAULT_CALLBACK_URL: &str = "http://localhost:3000/payments/callback";

#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub placement: PlacementConfig,
    pub bus: BusConfig,
    pub reconciliation: ReconciliationConfig,
    /// Retry for optimistic conflicts in the asynchronous steps.
    pub conflict_retry: RetryPolicy,
    /// Retry for transient PG failures; each attempt looks the order up again.
    pub pg_retry: RetryPolicy,
    /// Sent to the PG with every payment request.
    pub callback_url: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            placement: PlacementConfig::default(),
            bus: BusConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            conflict_retry: RetryPolicy::default(),
            pg_retry: RetryPolicy::default(),
            callback_url: DEFAULT_CALLBACK_URL.to_string(),
        }
    }
}

/// Every saga component, wired to each other.
pub struct CheckoutSaga<S: Store> {
    pub placement: Arc<OrderPlacement<S>>,
    pub payments: Arc<PaymentService<S>>,
    pub bus: Arc<EventBus<S>>,
    pub reconciliation: Arc<ReconciliationScheduler<S>>,
}

impl<S: Store + Clone> CheckoutSaga<S> {
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>, config: SagaConfig) -> Self {
        let retry = config.conflict_retry;

        let processors = ProcessorRegistry::new()
            .register(Arc::new(WalletProcessor::new(store.clone(), retry.clone())))
            .register(Arc::new(CardProcessor::new(
                store.clone(),
                gateway,
                config.callback_url,
                retry.clone(),
                config.pg_retry,
            )));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            processors,
            retry.clone(),
        ));

        let mut bus = EventBus::new(store.clone(), config.bus);
        bus.register(payments.clone());
        bus.register(Arc::new(OrderStatusSync::new(store.clone(), retry.clone())));
        bus.register(Arc::new(StockCompensation::new(store.clone(), retry.clone())));
        bus.register(Arc::new(CouponCompensation::new(store.clone(), retry)));

        Self {
            placement: Arc::new(OrderPlacement::new(store.clone(), config.placement)),
            reconciliation: Arc::new(ReconciliationScheduler::new(
                store,
                payments.clone(),
                config.reconciliation,
            )),
            payments,
            bus: Arc::new(bus),
        }
    }

    /// Starts the event bus and the reconciliation scheduler.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let bus = Arc::clone(&self.bus);
        let bus_shutdown = shutdown.clone();
        let reconciliation = Arc::clone(&self.reconciliation);
        vec![
            tokio::spawn(async move { bus.run(bus_shutdown).await }),
            tokio::spawn(async move { reconciliation.run(shutdown).await }),
        ]
    }
}
