//! Retention sweeps for the delivery ledger and the postponement store.
//!
//! Ledger rows only need to outlive upstream redelivery, so they are dropped
//! once older than the ledger retention. Postponed rows that were never
//! replayed are dropped after their own, longer retention.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::RetentionConfig;
use crate::database::DbPool;
use crate::database::repositories::{LedgerOps, PostponedOps};
use crate::database::time::cutoff_ms;

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sent_notifications: u64,
    pub sent_announcements: u64,
    pub postponed_notifications: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.sent_notifications + self.sent_announcements + self.postponed_notifications
    }
}

/// Periodic retention sweeper.
pub struct RetentionSweeper {
    pool: DbPool,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(pool: DbPool, config: RetentionConfig) -> Self {
        Self { pool, config }
    }

    /// Run sweeps every `sweep_interval` until `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(cancel).await })
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Retention sweeper stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_at(Utc::now()).await {
                        tracing::error!(error = %e, "Retention sweep failed");
                    }
                }
            }
        }
    }

    /// Delete everything that expired as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> crate::Result<SweepReport> {
        let ledger_cutoff = cutoff_ms(now, self.config.ledger);
        let postponed_cutoff = cutoff_ms(now, self.config.postponed);

        let report = SweepReport {
            sent_notifications: LedgerOps::prune_notifications_before(&self.pool, ledger_cutoff)
                .await?,
            sent_announcements: LedgerOps::prune_announcements_before(&self.pool, ledger_cutoff)
                .await?,
            postponed_notifications: PostponedOps::prune_before(&self.pool, postponed_cutoff)
                .await?,
        };

        if report.total() > 0 {
            tracing::info!(
                sent_notifications = report.sent_notifications,
                sent_announcements = report.sent_announcements,
                postponed_notifications = report.postponed_notifications,
                "Retention sweep removed expired rows"
            );
        }
        Ok(report)
    }
}
