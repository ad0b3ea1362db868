//! ExpirationSweeper - Background service that settles elapsed periods.
//!
//! Each sweep:
//! 1. Loads `active`/`trial` subscriptions whose `expires_at` has passed
//! 2. Auto-renews those with renewal on; expires the rest
//! 3. Fails `pending` charges that were never confirmed
//!
//! Counter reconciliation runs on its own, slower, interval.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 60s | Time between sweeps |
//! | `batch_size` | 100 | Max due subscriptions per sweep |
//! | `concurrency` | 8 | Subscriptions processed in parallel |
//! | `reconcile_interval` | 1h | Time between counter reconciliation passes |
//!
//! ## Graceful Shutdown
//!
//! The service listens for a shutdown signal and finishes the sweep in
//! progress before stopping. No new sweep starts after the signal.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{PaymentConfig, SweeperConfig};
use crate::domain::subscription::{Subscription, SubscriptionError};
use crate::ports::{Clock, SubscriptionStore};

use super::handlers::subscription::{
    AutoRenewSubscriptionCommand, AutoRenewSubscriptionHandler, CancelStalePendingCommand,
    CancelStalePendingHandler, ExpireSubscriptionCommand, ExpireSubscriptionHandler,
    ReconcileCountersCommand, ReconcileCountersHandler, RenewalOutcome,
};

/// Configuration for the ExpirationSweeper service.
#[derive(Debug, Clone)]
pub struct ExpirationSweeperConfig {
    pub interval: Duration,
    pub batch_size: u32,
    pub concurrency: usize,
    pub reconcile_interval: Duration,
    /// Age after which an unconfirmed `pending` charge is abandoned.
    pub pending_timeout: Duration,
}

impl Default for ExpirationSweeperConfig {
    fn default() -> Self {
        Self::from_config(&SweeperConfig::default(), &PaymentConfig::default())
    }
}

impl ExpirationSweeperConfig {
    pub fn from_config(sweeper: &SweeperConfig, payment: &PaymentConfig) -> Self {
        Self {
            interval: sweeper.interval(),
            batch_size: sweeper.batch_size,
            concurrency: sweeper.concurrency,
            reconcile_interval: sweeper.reconcile_interval(),
            pending_timeout: payment.pending_timeout(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub renewed: usize,
    pub renewal_failed: usize,
    pub expired: usize,
    pub pending_timed_out: usize,
    pub skipped: usize,
    /// Records whose processing returned an error; retried next sweep.
    pub errors: usize,
}

impl SweepReport {
    fn absorb(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Renewed => self.renewed += 1,
            ItemOutcome::RenewalFailed => self.renewal_failed += 1,
            ItemOutcome::Expired => self.expired += 1,
            ItemOutcome::PendingTimedOut => self.pending_timed_out += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Error => self.errors += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.renewed + self.renewal_failed + self.expired + self.pending_timed_out
    }
}

enum ItemOutcome {
    Renewed,
    RenewalFailed,
    Expired,
    PendingTimedOut,
    Skipped,
    Error,
}

/// Background service that renews or expires elapsed subscriptions.
pub struct ExpirationSweeper {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
    auto_renew: AutoRenewSubscriptionHandler,
    expire: ExpireSubscriptionHandler,
    stale_pending: CancelStalePendingHandler,
    reconcile: ReconcileCountersHandler,
    config: ExpirationSweeperConfig,
}

impl ExpirationSweeper {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
        auto_renew: AutoRenewSubscriptionHandler,
        expire: ExpireSubscriptionHandler,
        stale_pending: CancelStalePendingHandler,
        reconcile: ReconcileCountersHandler,
        config: ExpirationSweeperConfig,
    ) -> Self {
        Self {
            store,
            clock,
            auto_renew,
            expire,
            stale_pending,
            reconcile,
            config,
        }
    }

    /// Run the sweep loop until the shutdown signal is received.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut sweep_tick = time::interval(self.config.interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconcile_tick = time::interval(self.config.reconcile_interval);
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately.
        reconcile_tick.tick().await;

        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Expiration sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Expiration sweeper stopping");
                        return;
                    }
                }

                _ = sweep_tick.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.processed() > 0 || report.errors > 0 => {
                            info!(
                                renewed = report.renewed,
                                renewal_failed = report.renewal_failed,
                                expired = report.expired,
                                pending_timed_out = report.pending_timed_out,
                                errors = report.errors,
                                "Sweep finished"
                            );
                        }
                        Ok(_) => debug!("Sweep found nothing to do"),
                        Err(err) => error!(error = %err, "Sweep failed"),
                    }
                }

                _ = reconcile_tick.tick() => {
                    if let Err(err) = self.reconcile.handle(ReconcileCountersCommand::default()).await {
                        error!(error = %err, "Counter reconciliation pass failed");
                    }
                }
            }
        }
    }

    /// Run one sweep. Per-record failures are logged and counted, not returned.
    pub async fn sweep_once(&self) -> Result<SweepReport, SubscriptionError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let due = self.store.find_due(now, self.config.batch_size).await?;
        let outcomes: Vec<ItemOutcome> = stream::iter(due)
            .map(|subscription| self.settle_due(subscription))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        outcomes.into_iter().for_each(|o| report.absorb(o));

        let cutoff = now.minus_secs(self.config.pending_timeout.as_secs());
        let stale = self
            .store
            .find_stale_pending(cutoff, self.config.batch_size)
            .await?;
        let outcomes: Vec<ItemOutcome> = stream::iter(stale)
            .map(|subscription| self.settle_stale_pending(subscription))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        outcomes.into_iter().for_each(|o| report.absorb(o));

        Ok(report)
    }

    async fn settle_due(&self, subscription: Subscription) -> ItemOutcome {
        let subscription_id = subscription.id;
        let renewal = self
            .auto_renew
            .handle(AutoRenewSubscriptionCommand { subscription_id })
            .await;

        match renewal {
            Ok(result) => match result.outcome {
                RenewalOutcome::Renewed => ItemOutcome::Renewed,
                RenewalOutcome::Failed { .. } => ItemOutcome::RenewalFailed,
                RenewalOutcome::Skipped => ItemOutcome::Skipped,
                RenewalOutcome::NotRenewable => {
                    match self
                        .expire
                        .handle(ExpireSubscriptionCommand { subscription_id })
                        .await
                    {
                        Ok(result) if result.expired => ItemOutcome::Expired,
                        Ok(_) => ItemOutcome::Skipped,
                        Err(err) => {
                            warn!(subscription_id = %subscription_id, error = %err, "Expiration failed");
                            ItemOutcome::Error
                        }
                    }
                }
            },
            Err(err) => {
                warn!(subscription_id = %subscription_id, error = %err, "Auto-renewal failed");
                ItemOutcome::Error
            }
        }
    }

    async fn settle_stale_pending(&self, subscription: Subscription) -> ItemOutcome {
        let subscription_id = subscription.id;
        match self
            .stale_pending
            .handle(CancelStalePendingCommand { subscription_id })
            .await
        {
            Ok(result) if result.timed_out => ItemOutcome::PendingTimedOut,
            Ok(_) => ItemOutcome::Skipped,
            Err(err) => {
                warn!(subscription_id = %subscription_id, error = %err, "Stale pending cleanup failed");
                ItemOutcome::Error
            }
        }
    }
}
