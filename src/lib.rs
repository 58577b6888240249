pub mod cli;
pub mod config;
pub mod coordination;
pub mod error;
pub mod hive;
pub mod listener;
pub mod pipeline;
pub mod runtime;
pub mod simulation;
pub mod store;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal, ShutdownToken};
pub use error::{ExecutionError, HiveError, Result, StepError};
pub use hive::{HiveBus, HiveEvent, HiveMessage, HiveState, LivenessStatus, SubsystemEntry};
pub use listener::ListenerHandle;
pub use pipeline::{
    ActionExecutor, DryRunExecutor, ExecutionStep, FailureKind, StepHandler, StepStatus,
    TriggerContext, ValidationPipeline, ValidationTrace,
};
pub use runtime::{mirror_coherence, HiveRuntime};
pub use store::{GlobalState, GlobalStore, StatePatch, StoreEvent};
