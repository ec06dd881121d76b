//! Periodic ingest report.
//!
//! Every [`REPORT_INTERVAL`](crate::server::config::REPORT_INTERVAL) the
//! reporter logs how many unique and duplicate tokens arrived since the
//! previous report, plus the running unique total. The first report fires at
//! startup and covers nothing, so it reads `0, 0, 0` on a fresh server.

use core::{fmt, time::Duration};
use numlog_core::{DedupStore, StoreSnapshot};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One report's worth of numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub new_unique: u64,
    pub new_duplicates: u64,
    pub total_unique: u64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Received {} unique numbers, {} duplicates. Total unique numbers: {}",
            self.new_unique, self.new_duplicates, self.total_unique
        )
    }
}

pub struct StatsReporter {
    store: Arc<DedupStore>,
    baseline: StoreSnapshot,
}

impl StatsReporter {
    pub fn new(store: Arc<DedupStore>) -> Self {
        let baseline = store.snapshot();
        Self { store, baseline }
    }

    /// Computes the deltas since the previous call and advances the baseline.
    ///
    /// Both counters only grow, so the deltas never underflow; `saturating_sub`
    /// keeps that true even if a snapshot is taken mid-update.
    pub fn report(&mut self) -> StatsReport {
        let now = self.store.snapshot();
        let report = StatsReport {
            new_unique: now.unique.saturating_sub(self.baseline.unique),
            new_duplicates: now.duplicates.saturating_sub(self.baseline.duplicates),
            total_unique: now.unique,
        };
        self.baseline = now;
        report
    }

    /// Logs a report every `interval` until `token` is cancelled.
    pub async fn run(self, interval: Duration, token: CancellationToken) {
        self.run_with(interval, token, |report| {
            tracing::info!(
                new_unique = report.new_unique,
                new_duplicates = report.new_duplicates,
                total_unique = report.total_unique,
                "{report}"
            );
        })
        .await;
    }

    /// Hands a report to `emit` immediately and then every `interval` until
    /// `token` is cancelled. Missed ticks are skipped, never bursted.
    pub async fn run_with<F>(mut self, interval: Duration, token: CancellationToken, mut emit: F)
    where
        F: FnMut(StatsReport),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => emit(self.report()),
            }
        }

        tracing::debug!("Stats reporter stopped");
    }
}
