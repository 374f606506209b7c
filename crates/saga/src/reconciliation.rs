//! Periodic re-drive of payments that stopped moving.
//!
//! A payment left `CREATED` never reached the PG (crash, timeout, open
//! breaker). One left `PENDING` is waiting for a callback that may never
//! come. Both go back through [`PaymentService::process`], the same path
//! event delivery uses.
//!
//! Sweeps take the least recently updated payments first. A re-drive that
//! leaves a payment unchanged touches it, so it queues behind the others and
//! a full batch of hopeless payments cannot hide newer ones.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::{Payment, PaymentStatus};
use store::{Store, Transaction};
use tokio::sync::watch;

use crate::error::Result;
use crate::payments::PaymentService;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub interval: Duration,
    /// A payment untouched for this long is considered stuck.
    pub stale_after: Duration,
    /// Per sweep and status.
    pub batch_size: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

/// What one sweep saw and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stuck payments found.
    pub examined: usize,
    /// Payments that reached a final status during the sweep.
    pub settled: usize,
    /// Payments whose re-drive returned an error.
    pub failed: usize,
}

pub struct ReconciliationScheduler<S> {
    store: S,
    payments: Arc<PaymentService<S>>,
    config: ReconciliationConfig,
}

impl<S: Store + Clone> ReconciliationScheduler<S> {
    pub fn new(store: S, payments: Arc<PaymentService<S>>, config: ReconciliationConfig) -> Self {
        Self {
            store,
            payments,
            config,
        }
    }

    /// Runs both sweeps once.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or(chrono::Duration::MAX);
        let threshold = Utc::now()
            .checked_sub_signed(stale_after)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut report = SweepReport::default();
        for (status, sweep) in [
            (PaymentStatus::Created, "created"),
            (PaymentStatus::Pending, "pending"),
        ] {
            let stuck = self
                .store
                .find_stale_payments(status, threshold, self.config.batch_size)
                .await?;
            if stuck.is_empty() {
                continue;
            }
            tracing::info!(sweep, count = stuck.len(), "re-driving stuck payments");

            for payment in stuck {
                report.examined += 1;
                metrics::counter!("reconciliation_payments_total", "sweep" => sweep).increment(1);
                match self.payments.process(payment.id()).await {
                    Ok(updated) if updated.status().is_terminal() => {
                        report.settled += 1;
                        continue;
                    }
                    Ok(updated) => {
                        tracing::debug!(
                            payment_id = %updated.id(),
                            status = %updated.status(),
                            "payment still open"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(
                            payment_id = %payment.id(),
                            error = %e,
                            "reconciliation failed"
                        );
                    }
                }
                if let Err(e) = self.mark_checked(&payment).await {
                    tracing::warn!(
                        payment_id = %payment.id(),
                        error = %e,
                        "could not mark payment checked"
                    );
                }
            }
        }

        metrics::counter!("reconciliation_sweeps_total").increment(1);
        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                settled = report.settled,
                failed = report.failed,
                "reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Touches a payment the sweep left as it found it. A payment whose
    /// version moved was progressed by someone else and is left alone.
    async fn mark_checked(&self, seen: &Payment) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx.load_payment(seen.id()).await?;
        if payment.version() != seen.version() {
            tx.rollback().await?;
            return Ok(());
        }
        payment.touch();
        tx.update_payment(&mut payment).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Sweeps every `interval` until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "reconciliation scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "reconciliation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("reconciliation scheduler stopped");
    }
}
