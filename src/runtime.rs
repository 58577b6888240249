//! Component wiring
//!
//! Bus and store never reference each other. This module owns the one-way
//! link from the bus aggregate into the store and the background tasks of a
//! running process.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::coordination::{GracefulShutdown, ShutdownConfig, ShutdownToken};
use crate::error::{HiveError, Result};
use crate::hive::{HiveBus, HiveEvent};
use crate::pipeline::{ActionExecutor, AutoRunner, ValidationPipeline};
use crate::store::{GlobalStore, StatePatch};

/// Copy every published hive aggregate into `hive_mind_coherence` of the store
pub fn mirror_coherence(
    bus: &HiveBus,
    store: GlobalStore,
    mut shutdown: ShutdownToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(HiveEvent::State(state)) => {
                        store
                            .set_partial_state(
                                StatePatch::new().hive_mind_coherence(state.hive_mind_coherence),
                            )
                            .await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // The next state event carries the latest aggregate
                        debug!("Coherence mirror lagged by {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.wait_for_shutdown() => break,
            }
        }
        debug!("Coherence mirror stopped");
    })
}

/// One process worth of components sharing a config
pub struct HiveRuntime {
    pub config: AppConfig,
    pub bus: HiveBus,
    pub store: GlobalStore,
    pub pipeline: ValidationPipeline,
    pub shutdown: Arc<GracefulShutdown>,
}

impl HiveRuntime {
    pub fn build(config: AppConfig, executor: Arc<dyn ActionExecutor>) -> Result<Self> {
        if let Err(errors) = config.validate() {
            return Err(HiveError::InvalidConfig(errors.join("; ")));
        }
        match (config.dry_run.enabled, executor.is_dry_run()) {
            (true, false) => {
                return Err(HiveError::InvalidConfig(format!(
                    "dry_run.enabled=true but executor {} places live orders",
                    executor.name()
                )));
            }
            (false, true) => {
                return Err(HiveError::InvalidConfig(format!(
                    "dry_run.enabled=false but executor {} only simulates fills",
                    executor.name()
                )));
            }
            _ => {}
        }

        let bus = HiveBus::new(config.hive.clone());
        let store = GlobalStore::new(config.store.clone());
        let pipeline =
            ValidationPipeline::standard(&config, bus.clone(), store.clone(), executor)?;
        let shutdown = Arc::new(GracefulShutdown::new(ShutdownConfig::default()));

        info!(
            "Runtime built: {} pipeline steps [{}]",
            pipeline.len(),
            pipeline.step_names().join(" -> ")
        );

        Ok(Self {
            config,
            bus,
            store,
            pipeline,
            shutdown,
        })
    }

    /// Liveness sweeper plus the coherence mirror
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.bus.spawn_sweeper(self.shutdown.token()),
            mirror_coherence(&self.bus, self.store.clone(), self.shutdown.token()),
        ]
    }

    /// Scheduled runs every `pipeline.auto_run_interval_ms`
    pub fn spawn_auto_runner(&self) -> JoinHandle<()> {
        let runner = AutoRunner::new(
            self.pipeline.clone(),
            self.store.clone(),
            self.config.pipeline.auto_run_interval(),
        );
        let handle = runner.spawn(self.shutdown.token());
        tokio::spawn(async move {
            match handle.await {
                Ok(stats) => debug!("Auto-runner finished: {:?}", stats),
                Err(e) => warn!("Auto-runner task failed: {}", e),
            }
        })
    }
}
