//! Relays committed outbox entries to event handlers.
//!
//! Entries are delivered in commit order. An entry is marked dispatched only
//! after every subscribed handler succeeded; otherwise it stays pending and is
//! tried again until it is dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use domain::{DomainEvent, SagaEvent};
use store::{DeliveryStatus, OutboxEntry, Store};
use tokio::sync::watch;

use crate::error::Result;
use crate::handlers::EventHandler;

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Fallback wake-up when no commit notification arrives.
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Failed deliveries before an entry is dead-lettered.
    pub max_delivery_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            batch_size: 100,
            max_delivery_attempts: 5,
        }
    }
}

pub struct EventBus<S: Store> {
    store: S,
    handlers: Vec<Arc<dyn EventHandler>>,
    config: BusConfig,
}

impl<S: Store> EventBus<S> {
    pub fn new(store: S, config: BusConfig) -> Self {
        Self {
            store,
            handlers: Vec::new(),
            config,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Delivers one batch of pending entries. Returns how many were taken.
    pub async fn pump_once(&self) -> Result<usize> {
        let entries = self.store.pending_events(self.config.batch_size).await?;
        for entry in &entries {
            self.deliver(entry).await?;
        }
        Ok(entries.len())
    }

    /// Delivers until the outbox is quiet, including events the handlers
    /// themselves enqueue. Returns the number of deliveries made.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let delivered = self.pump_once().await?;
            if delivered == 0 {
                return Ok(total);
            }
            total += delivered;
        }
    }

    /// Delivers until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let notify = self.store.outbox_notify();
        tracing::info!(handlers = self.handlers.len(), "event bus started");

        while !*shutdown.borrow() {
            let delivered = match self.pump_once().await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "outbox relay failed");
                    0
                }
            };
            // A full batch means more is probably waiting.
            if delivered >= self.config.batch_size {
                continue;
            }

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("event bus stopped");
    }

    #[tracing::instrument(
        skip(self, entry),
        fields(sequence = entry.sequence, event_type = %entry.event_type, order_id = %entry.order_id)
    )]
    async fn deliver(&self, entry: &OutboxEntry) -> Result<()> {
        let event = match entry.decode() {
            Ok(event) => event,
            Err(e) => {
                // Will never decode; no point retrying.
                self.fail(entry, &format!("undecodable payload: {e}"), 1).await?;
                return Ok(());
            }
        };

        let mut errors = Vec::new();
        for handler in self.subscribers(&event) {
            if let Err(e) = handler.handle(&event).await {
                tracing::error!(handler = handler.name(), error = %e, "event handler failed");
                errors.push(format!("{}: {e}", handler.name()));
            }
        }

        if errors.is_empty() {
            self.store.mark_dispatched(entry.sequence).await?;
            metrics::counter!("outbox_events_dispatched_total").increment(1);
            tracing::debug!("event dispatched");
        } else {
            self.fail(entry, &errors.join("; "), self.config.max_delivery_attempts)
                .await?;
        }
        Ok(())
    }

    fn subscribers<'a>(
        &'a self,
        event: &'a SagaEvent,
    ) -> impl Iterator<Item = &'a Arc<dyn EventHandler>> + 'a {
        let event_type = event.event_type();
        self.handlers
            .iter()
            .filter(move |h| h.handles().contains(&event_type))
    }

    async fn fail(&self, entry: &OutboxEntry, error: &str, max_attempts: u32) -> Result<()> {
        let status = self
            .store
            .record_delivery_failure(entry.sequence, error, max_attempts)
            .await?;
        if status == DeliveryStatus::Dead {
            metrics::counter!("outbox_events_dead_total").increment(1);
            tracing::error!(attempts = entry.attempts + 1, error, "event dead-lettered");
        } else {
            tracing::warn!(attempts = entry.attempts + 1, "event delivery failed, will retry");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use common::OrderId;
    use domain::OrderFailed;
    use store::{InMemoryStore, Transaction};

    use super::*;
    use crate::error::SagaError;

    struct Counting {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl Counting {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl EventHandler for Counting {
        fn name(&self) -> &'static str {
            "Counting"
        }

        fn handles(&self) -> &'static [&'static str] {
            &[SagaEvent::ORDER_FAILED]
        }

        async fn handle(&self, _event: &SagaEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(SagaError::Validation("not yet".into()));
            }
            Ok(())
        }
    }

    async fn publish(store: &InMemoryStore) {
        let mut tx = store.begin().await.unwrap();
        tx.enqueue(OrderFailed { order_id: OrderId::new() }.into())
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    fn config(max_delivery_attempts: u32) -> BusConfig {
        BusConfig {
            max_delivery_attempts,
            ..BusConfig::default()
        }
    }

    #[tokio::test]
    async fn test_delivers_to_subscribers() {
        let store = InMemoryStore::new();
        let handler = Counting::new(0);
        let mut bus = EventBus::new(store.clone(), config(3));
        bus.register(handler.clone());
        publish(&store).await;
        publish(&store).await;

        let delivered = bus.drain().await.unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.event_count(DeliveryStatus::Dispatched).await, 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried() {
        let store = InMemoryStore::new();
        let handler = Counting::new(1);
        let mut bus = EventBus::new(store.clone(), config(3));
        bus.register(handler.clone());
        publish(&store).await;

        bus.pump_once().await.unwrap();
        assert_eq!(store.event_count(DeliveryStatus::Pending).await, 1);

        bus.drain().await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.event_count(DeliveryStatus::Dispatched).await, 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_dead_lettered() {
        let store = InMemoryStore::new();
        let handler = Counting::new(u32::MAX);
        let mut bus = EventBus::new(store.clone(), config(3));
        bus.register(handler.clone());
        publish(&store).await;

        bus.drain().await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.event_count(DeliveryStatus::Dead).await, 1);
        assert!(store.last_delivery_error(1).await.unwrap().contains("not yet"));
    }

    #[tokio::test]
    async fn test_unsubscribed_events_are_dispatched() {
        let store = InMemoryStore::new();
        let bus = EventBus::new(store.clone(), BusConfig::default());
        publish(&store).await;

        bus.drain().await.unwrap();

        assert_eq!(bus.handler_count(), 0);
        assert_eq!(store.event_count(DeliveryStatus::Dispatched).await, 1);
    }

    #[tokio::test]
    async fn test_run_wakes_on_commit_and_stops() {
        let store = InMemoryStore::new();
        let handler = Counting::new(0);
        let mut bus = EventBus::new(
            store.clone(),
            BusConfig {
                poll_interval: Duration::from_secs(60),
                ..BusConfig::default()
            },
        );
        bus.register(handler.clone());
        let bus = Arc::new(bus);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn({
            let bus = Arc::clone(&bus);
            async move { bus.run(shutdown_rx).await }
        });

        publish(&store).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.event_count(DeliveryStatus::Dispatched).await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
