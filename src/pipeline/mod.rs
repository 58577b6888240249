pub mod auto_run;
pub mod executor;
pub mod pipeline;
pub mod step;
pub mod steps;
pub mod trace;

pub use auto_run::{AutoRunStats, AutoRunner};
pub use executor::{ActionExecutor, DryRunExecutor, ExecutionReceipt, OrderRequest, OrderSide};
pub use pipeline::{PipelineBuilder, PipelineEvent, ValidationPipeline};
pub use step::{require, ExecutionStep, StepContext, StepHandler, TriggerContext, TriggerKind};
pub use steps::{
    HiveConsensusStep, MarketDataStep, OrderExecutionStep, PositionSizingStep, RiskCheckStep,
    SignalAggregationStep,
};
pub use trace::{
    ConsensusOutput, ExecutionOutput, FailureKind, MarketDataOutput, RiskOutput, Scalar,
    SignalOutput, SizingOutput, StepOutput, StepStatus, TraceFailure, TraceStatus, ValidationStep,
    ValidationTrace,
};
