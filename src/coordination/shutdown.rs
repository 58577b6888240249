//! Graceful Shutdown Handler
//!
//! Coordinates stopping the background tasks (liveness sweeper, simulated
//! producers, scheduled pipeline trigger) and draining an in-flight pipeline
//! run before the process exits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Emergency shutdown - skip draining
    Emergency,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Emergency => write!(f, "emergency"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for an in-flight pipeline run to seal its trace (default: 30s)
    pub pipeline_drain_timeout_secs: u64,
    /// Time to wait for background tasks to exit (default: 5s)
    pub task_join_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            pipeline_drain_timeout_secs: 30,
            task_join_timeout_secs: 5,
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Scheduled triggers no longer start new runs
    StoppingTriggers,
    /// Waiting for an in-flight run to finish
    DrainingPipeline,
    /// Joining sweeper and producer tasks
    StoppingTasks,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingTriggers => write!(f, "stopping_triggers"),
            ShutdownPhase::DrainingPipeline => write!(f, "draining_pipeline"),
            ShutdownPhase::StoppingTasks => write!(f, "stopping_tasks"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
    phase_tx: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    /// Create a new graceful shutdown handler
    pub fn new(config: ShutdownConfig) -> Self {
        let (signal_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            signal_tx,
            phase_tx,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.signal_tx.borrow().is_some()
    }

    /// Get current shutdown phase
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        let accepted = self.signal_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signal);
            true
        });

        if accepted {
            info!("Shutdown requested: {}", signal);
        } else {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
        }
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase_tx.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Create a token that background tasks select on
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
        }
    }

    /// Execute the shutdown sequence
    ///
    /// 1. Stop scheduled triggers
    /// 2. Wait for an in-flight pipeline run (skipped on emergency)
    /// 3. Join background tasks
    pub async fn execute<F1, F2, F3>(&self, stop_triggers: F1, drain_pipeline: F2, join_tasks: F3)
    where
        F1: Future<Output = ()>,
        F2: Future<Output = ()>,
        F3: Future<Output = ()>,
    {
        let start = std::time::Instant::now();
        let signal = (*self.signal_tx.borrow()).unwrap_or(ShutdownSignal::Graceful);

        self.set_phase(ShutdownPhase::StoppingTriggers);
        stop_triggers.await;

        if signal == ShutdownSignal::Graceful {
            self.set_phase(ShutdownPhase::DrainingPipeline);
            let drain_timeout = Duration::from_secs(self.config.pipeline_drain_timeout_secs);
            if tokio::time::timeout(drain_timeout, drain_pipeline)
                .await
                .is_err()
            {
                warn!(
                    "Pipeline drain timeout after {}s, proceeding anyway",
                    self.config.pipeline_drain_timeout_secs
                );
            }
        } else {
            debug!("Emergency shutdown, not draining pipeline");
        }

        self.set_phase(ShutdownPhase::StoppingTasks);
        let join_timeout = Duration::from_secs(self.config.task_join_timeout_secs);
        if tokio::time::timeout(join_timeout, join_tasks).await.is_err() {
            warn!(
                "Background tasks did not stop within {}s",
                self.config.task_join_timeout_secs
            );
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());
    }
}

/// Token for checking shutdown status in async tasks
#[derive(Clone)]
pub struct ShutdownToken {
    signal_rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        self.signal_rx.borrow().is_some()
    }

    /// Wait for shutdown signal (returns immediately if already requested)
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.signal_rx.borrow_and_update() {
                return signal;
            }
            if self.signal_rx.changed().await.is_err() {
                // Sender dropped = owner is gone
                return ShutdownSignal::Emergency;
            }
        }
    }
}

/// Request a graceful shutdown on Ctrl+C
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                shutdown.request_shutdown(ShutdownSignal::Graceful);
            }
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    });
}
