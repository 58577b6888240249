//! Scheduled pipeline runs
//!
//! Fires `run()` on a fixed interval while trading is enabled in the store.
//! A tick that finds a run still in flight is skipped, not queued.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::pipeline::ValidationPipeline;
use super::step::TriggerContext;
use crate::coordination::ShutdownToken;
use crate::error::HiveError;
use crate::store::GlobalStore;

/// Counters for one auto-runner's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoRunStats {
    pub ticks: u64,
    pub runs: u64,
    pub skipped_inactive: u64,
    pub skipped_busy: u64,
    pub succeeded: u64,
}

pub struct AutoRunner {
    pipeline: ValidationPipeline,
    store: GlobalStore,
    interval: Duration,
}

impl AutoRunner {
    pub fn new(pipeline: ValidationPipeline, store: GlobalStore, interval: Duration) -> Self {
        Self {
            pipeline,
            store,
            interval,
        }
    }

    /// Evaluate one tick
    pub async fn tick(&self, stats: &mut AutoRunStats) {
        stats.ticks += 1;

        if !self.store.is_trading().await {
            stats.skipped_inactive += 1;
            debug!("Auto-run tick skipped: trading disabled");
            return;
        }

        match self.pipeline.run(TriggerContext::scheduled()).await {
            Ok(trace) => {
                stats.runs += 1;
                if trace.success {
                    stats.succeeded += 1;
                }
            }
            Err(HiveError::ConcurrentRunRejected { run_id }) => {
                stats.skipped_busy += 1;
                debug!("Auto-run tick skipped: run {} in flight", run_id);
            }
            Err(e) => error!("Auto-run failed: {}", e),
        }
    }

    /// Run until shutdown; returns the final counters
    pub fn spawn(self, mut shutdown: ShutdownToken) -> JoinHandle<AutoRunStats> {
        tokio::spawn(async move {
            info!("Auto-runner started (every {:?})", self.interval);
            let mut stats = AutoRunStats::default();
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick(&mut stats).await,
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }

            info!(
                "Auto-runner stopped: {} ticks, {} runs, {} succeeded",
                stats.ticks, stats.runs, stats.succeeded
            );
            stats
        })
    }
}
