//! Trade Validation Pipeline
//!
//! Runs N ordered steps against the store snapshot. The first failure aborts
//! the run and leaves every later step PENDING. Only the final execution
//! step can reach the action executor. At most one run is in flight per
//! pipeline; a second `run()` is rejected, never queued or interleaved.

use chrono::Utc;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::{ActionExecutor, TrackedExecutor};
use super::step::{ExecutionStep, StepContext, StepHandler, TriggerContext};
use super::steps::{
    HiveConsensusStep, MarketDataStep, OrderExecutionStep, PositionSizingStep, RiskCheckStep,
    SignalAggregationStep,
};
use super::trace::{FailureKind, StepOutput, StepStatus, TraceFailure, ValidationTrace};
use crate::config::{AppConfig, PipelineConfig};
use crate::error::{HiveError, Result, StepError};
use crate::hive::HiveBus;
use crate::listener::panic_message;
use crate::store::GlobalStore;

/// Progress events for UI/telemetry consumers
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        trigger: TriggerContext,
    },
    StepStarted {
        run_id: String,
        index: usize,
        name: String,
    },
    StepFinished {
        run_id: String,
        index: usize,
        name: String,
        status: StepStatus,
        error: Option<String>,
    },
    RunFinished(Box<ValidationTrace>),
}

struct PipelineInner {
    config: PipelineConfig,
    store: GlobalStore,
    steps: Vec<Arc<dyn StepHandler>>,
    execution: Arc<dyn ExecutionStep>,
    executor: Arc<dyn ActionExecutor>,
    step_names: Vec<String>,
    /// true while a run is in flight
    running: watch::Sender<bool>,
    current: RwLock<Option<ValidationTrace>>,
    history: RwLock<VecDeque<ValidationTrace>>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineInner {
    fn publish(&self, trace: &ValidationTrace) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(trace.clone());
    }

    fn archive(&self, trace: &ValidationTrace) {
        let limit = self.config.history_len;
        if limit == 0 {
            return;
        }
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        history.push_back(trace.clone());
        while history.len() > limit {
            history.pop_front();
        }
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Owns the in-flight slot for one run. Dropping it before `finish()` means
/// the run future was dropped mid-step: the trace is sealed as abandoned.
/// Either way the pipeline is marked idle.
struct RunGuard {
    inner: Arc<PipelineInner>,
    run_id: String,
    attempted: Arc<AtomicBool>,
    finished: bool,
}

impl RunGuard {
    /// Claim the pipeline and publish `trace` as current, or return the id of
    /// the run already in flight
    fn acquire(
        inner: &Arc<PipelineInner>,
        trace: &ValidationTrace,
        attempted: Arc<AtomicBool>,
    ) -> std::result::Result<Self, String> {
        // The flag flips under the trace lock so a rejected caller always
        // sees the in-flight run's id.
        let mut current = inner.current.write().unwrap_or_else(PoisonError::into_inner);
        let claimed = inner.running.send_if_modified(|running| {
            if *running {
                return false;
            }
            *running = true;
            true
        });
        if !claimed {
            return Err(current
                .as_ref()
                .map(|t| t.run_id.clone())
                .unwrap_or_default());
        }
        *current = Some(trace.clone());

        Ok(RunGuard {
            inner: inner.clone(),
            run_id: trace.run_id.clone(),
            attempted,
            finished: false,
        })
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            let abandoned = {
                let mut current = self
                    .inner
                    .current
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                match current.as_mut() {
                    Some(trace) if trace.run_id == self.run_id && !trace.is_complete() => {
                        trace.abandon(self.attempted.load(Ordering::SeqCst), Utc::now());
                        Some(trace.clone())
                    }
                    _ => None,
                }
            };

            if let Some(trace) = abandoned {
                match trace.failure.as_ref().map(|f| f.kind) {
                    Some(FailureKind::ExternalActionFailed) => error!(
                        "Pipeline run {} abandoned after the action was attempted - external state needs reconciliation",
                        self.run_id
                    ),
                    _ => warn!("Pipeline run {} abandoned mid-step", self.run_id),
                }
                self.inner.archive(&trace);
                self.inner.emit(PipelineEvent::RunFinished(Box::new(trace)));
            }
        }
        self.inner.running.send_replace(false);
    }
}

/// Builder for a pipeline with custom steps
pub struct PipelineBuilder {
    config: PipelineConfig,
    store: GlobalStore,
    steps: Vec<Arc<dyn StepHandler>>,
    execution: Option<Arc<dyn ExecutionStep>>,
    executor: Option<Arc<dyn ActionExecutor>>,
}

impl PipelineBuilder {
    /// Append a read-only step
    pub fn step(mut self, step: Arc<dyn StepHandler>) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the final step
    pub fn execution(mut self, step: Arc<dyn ExecutionStep>) -> Self {
        self.execution = Some(step);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<ValidationPipeline> {
        let execution = self
            .execution
            .ok_or_else(|| HiveError::InvalidConfig("pipeline has no execution step".into()))?;
        let executor = self
            .executor
            .ok_or_else(|| HiveError::InvalidConfig("pipeline has no action executor".into()))?;

        let mut step_names: Vec<String> = self.steps.iter().map(|s| s.name().to_string()).collect();
        step_names.push(execution.name().to_string());

        let (event_tx, _) = broadcast::channel(self.config.event_buffer.max(1));

        Ok(ValidationPipeline {
            inner: Arc::new(PipelineInner {
                config: self.config,
                store: self.store,
                steps: self.steps,
                execution,
                executor,
                step_names,
                running: watch::channel(false).0,
                current: RwLock::new(None),
                history: RwLock::new(VecDeque::new()),
                event_tx,
            }),
        })
    }
}

/// Clonable handle to one pipeline instance
#[derive(Clone)]
pub struct ValidationPipeline {
    inner: Arc<PipelineInner>,
}

impl ValidationPipeline {
    pub fn builder(config: PipelineConfig, store: GlobalStore) -> PipelineBuilder {
        PipelineBuilder {
            config,
            store,
            steps: Vec::new(),
            execution: None,
            executor: None,
        }
    }

    /// The built-in six-step trading pipeline
    pub fn standard(
        config: &AppConfig,
        bus: HiveBus,
        store: GlobalStore,
        executor: Arc<dyn ActionExecutor>,
    ) -> Result<Self> {
        let p = &config.pipeline;
        Self::builder(p.clone(), store.clone())
            .step(Arc::new(MarketDataStep::new(p.max_data_age_secs)))
            .step(Arc::new(HiveConsensusStep::new(
                bus,
                p.min_coherence,
                p.min_active_subsystems,
            )))
            .step(Arc::new(SignalAggregationStep::new(p.min_signal_confidence)))
            .step(Arc::new(RiskCheckStep::new(config.risk.clone())))
            .step(Arc::new(PositionSizingStep))
            .execution(Arc::new(OrderExecutionStep::new(
                store,
                p.execution_timeout(),
            )))
            .executor(executor)
            .build()
    }

    /// Step names in execution order
    pub fn step_names(&self) -> &[String] {
        &self.inner.step_names
    }

    pub fn len(&self) -> usize {
        self.inner.step_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.step_names.is_empty()
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Current or most recent trace
    pub fn get_trace(&self) -> Option<ValidationTrace> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sealed traces, oldest first
    pub fn recent_traces(&self) -> Vec<ValidationTrace> {
        self.inner
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Wait until no run is in flight
    pub async fn wait_idle(&self) {
        let mut running = self.inner.running.subscribe();
        // The sender lives as long as `self`, so this only returns once idle
        let _ = running.wait_for(|busy| !*busy).await;
    }

    /// Execute every step in order and return the sealed trace.
    ///
    /// Step failures never surface as errors; they are recorded on the trace.
    /// The only error is `ConcurrentRunRejected`.
    pub async fn run(&self, trigger: TriggerContext) -> Result<ValidationTrace> {
        let inner = &self.inner;
        let run_id = Uuid::new_v4().to_string();
        let mut trace =
            ValidationTrace::new(run_id.clone(), trigger.clone(), &inner.step_names, Utc::now());

        let tracked = TrackedExecutor::new(inner.executor.clone());
        let guard = match RunGuard::acquire(inner, &trace, tracked.attempted_flag()) {
            Ok(guard) => guard,
            Err(busy) => {
                warn!("Pipeline run rejected, run {} still in flight", busy);
                return Err(HiveError::ConcurrentRunRejected { run_id: busy });
            }
        };

        info!(
            "Pipeline run {} started ({:?} by {})",
            run_id, trigger.kind, trigger.requested_by
        );
        self.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            trigger: trigger.clone(),
        });

        let mut outputs: Vec<StepOutput> = Vec::with_capacity(inner.step_names.len());
        let last = inner.step_names.len() - 1;

        for idx in 0..=last {
            let name = inner.step_names[idx].clone();
            let is_execution = idx == last;

            trace.steps[idx].start(Utc::now());
            inner.publish(&trace);
            self.emit(PipelineEvent::StepStarted {
                run_id: run_id.clone(),
                index: idx + 1,
                name: name.clone(),
            });
            debug!("Run {} step {}/{} {} running", run_id, idx + 1, last + 1, name);

            let state = inner.store.get_state().await;
            let result = {
                let ctx = StepContext {
                    run_id: &run_id,
                    prior: &outputs,
                    state: &state,
                    trigger: &trigger,
                };
                if is_execution {
                    let timeout = inner
                        .execution
                        .timeout()
                        .unwrap_or_else(|| inner.config.step_timeout());
                    guarded(timeout, inner.execution.execute(&ctx, &tracked)).await
                } else {
                    let step = &inner.steps[idx];
                    let timeout = step.timeout().unwrap_or_else(|| inner.config.step_timeout());
                    guarded(timeout, step.run(&ctx)).await
                }
            };

            match result {
                Ok(output) => {
                    if let StepOutput::Execution(exec) = &output {
                        trace.order_id = Some(exec.order_id.clone());
                    }
                    trace.steps[idx].succeed(output.clone(), Utc::now());
                    outputs.push(output);
                    self.emit(PipelineEvent::StepFinished {
                        run_id: run_id.clone(),
                        index: idx + 1,
                        name,
                        status: StepStatus::Success,
                        error: None,
                    });
                }
                Err(err) => {
                    let kind = if is_execution && tracked.attempted() {
                        FailureKind::ExternalActionFailed
                    } else {
                        FailureKind::StepValidationFailed
                    };
                    trace.steps[idx].fail(&err, Utc::now());
                    trace.failure = Some(TraceFailure {
                        step_index: idx + 1,
                        step_name: name.clone(),
                        kind,
                        reason: err.reason(),
                        timed_out: err.is_timeout(),
                    });

                    match kind {
                        FailureKind::ExternalActionFailed => error!(
                            "Run {} {} at step {} ({}): {} - external state needs reconciliation",
                            run_id,
                            kind,
                            idx + 1,
                            name,
                            err
                        ),
                        FailureKind::StepValidationFailed => warn!(
                            "Run {} {} at step {} ({}): {}",
                            run_id,
                            kind,
                            idx + 1,
                            name,
                            err
                        ),
                    }

                    self.emit(PipelineEvent::StepFinished {
                        run_id: run_id.clone(),
                        index: idx + 1,
                        name,
                        status: StepStatus::Failed,
                        error: Some(err.reason()),
                    });
                    break;
                }
            }
        }

        trace.action_attempted = tracked.attempted();
        trace.seal(Utc::now());
        info!(
            "Pipeline run {} complete: success={} ({}ms)",
            run_id,
            trace.success,
            trace.duration_ms().unwrap_or_default()
        );

        inner.publish(&trace);
        inner.archive(&trace);
        inner.emit(PipelineEvent::RunFinished(Box::new(trace.clone())));
        guard.finish();
        Ok(trace)
    }

    fn emit(&self, event: PipelineEvent) {
        self.inner.emit(event);
    }
}

/// Run a step future under a timeout, turning panics into step failures
async fn guarded<F>(timeout: Duration, fut: F) -> std::result::Result<StepOutput, StepError>
where
    F: Future<Output = std::result::Result<StepOutput, StepError>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(StepError::Panicked(panic_message(&*panic))),
        Err(_) => Err(StepError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::pipeline::executor::{ExecutionReceipt, OrderRequest};
    use crate::pipeline::trace::TraceStatus;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        name: &'static str,
        fail_with: Option<&'static str>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail_with: None,
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(name: &'static str, reason: &'static str) -> Self {
            Self {
                fail_with: Some(reason),
                ..Self::ok(name)
            }
        }
    }

    #[async_trait]
    impl StepHandler for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, ctx: &StepContext<'_>) -> std::result::Result<StepOutput, StepError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(reason) = self.fail_with {
                return Err(StepError::rejected(reason));
            }
            let mut out = BTreeMap::new();
            out.insert("seen_prior".to_string(), ctx.prior.len().into());
            Ok(StepOutput::Custom(out))
        }
    }

    struct Panicking;

    #[async_trait]
    impl StepHandler for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn run(&self, _ctx: &StepContext<'_>) -> std::result::Result<StepOutput, StepError> {
            panic!("handler bug");
        }
    }

    /// Execution step that always calls the executor with a fixed order
    struct PlaceFixed {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExecutionStep for PlaceFixed {
        fn name(&self) -> &str {
            "execute"
        }

        async fn execute(
            &self,
            ctx: &StepContext<'_>,
            executor: &dyn ActionExecutor,
        ) -> std::result::Result<StepOutput, StepError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let receipt = executor
                .place_order(&OrderRequest {
                    client_order_id: "c".into(),
                    run_id: ctx.run_id.to_string(),
                    side: crate::pipeline::OrderSide::Buy,
                    quantity: dec!(1),
                    limit_price: dec!(1),
                    notional_usd: dec!(1),
                })
                .await?;
            Ok(StepOutput::Execution(crate::pipeline::trace::ExecutionOutput {
                order_id: receipt.order_id,
                side: crate::pipeline::OrderSide::Buy,
                filled_quantity: receipt.filled_quantity,
                avg_fill_price: receipt.avg_fill_price,
                elapsed_ms: receipt.elapsed_ms,
            }))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ActionExecutor for FailingExecutor {
        fn name(&self) -> &str {
            "failing"
        }

        async fn place_order(
            &self,
            _request: &OrderRequest,
        ) -> std::result::Result<ExecutionReceipt, ExecutionError> {
            Err(ExecutionError::Transport("connection reset".into()))
        }
    }

    fn pipeline_with(
        steps: Vec<Arc<dyn StepHandler>>,
        exec_calls: Arc<AtomicUsize>,
        executor: Arc<dyn ActionExecutor>,
        step_timeout_ms: u64,
    ) -> ValidationPipeline {
        let config = PipelineConfig {
            step_timeout_ms,
            ..PipelineConfig::default()
        };
        let mut builder = ValidationPipeline::builder(config, GlobalStore::with_defaults());
        for step in steps {
            builder = builder.step(step);
        }
        builder
            .execution(Arc::new(PlaceFixed { calls: exec_calls }))
            .executor(executor)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let exec_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(
            vec![Arc::new(Scripted::ok("a")), Arc::new(Scripted::ok("b"))],
            exec_calls.clone(),
            Arc::new(crate::pipeline::DryRunExecutor::new()),
            1_000,
        );

        let trace = pipeline.run(TriggerContext::manual("test")).await.unwrap();

        assert!(trace.success);
        assert_eq!(trace.status, TraceStatus::Complete);
        assert_eq!(trace.statuses(), vec![StepStatus::Success; 3]);
        assert!(trace.action_attempted);
        assert!(trace.order_id.as_deref().unwrap().starts_with("dry-"));
        // Outputs feed forward
        assert_eq!(
            trace.steps[1].output.as_ref().unwrap().to_scalars()["seen_prior"],
            crate::pipeline::Scalar::Int(1)
        );
        assert_eq!(exec_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_step() {
        let exec_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(
            vec![Arc::new(Panicking)],
            exec_calls.clone(),
            Arc::new(crate::pipeline::DryRunExecutor::new()),
            1_000,
        );

        let trace = pipeline.run(TriggerContext::manual("test")).await.unwrap();

        assert!(!trace.success);
        assert_eq!(trace.statuses(), vec![StepStatus::Failed, StepStatus::Pending]);
        assert_eq!(trace.steps[0].error.as_deref(), Some("Panicked"));
        assert_eq!(exec_calls.load(Ordering::SeqCst), 0);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_step_timeout_is_validation_failure() {
        let exec_calls = Arc::new(AtomicUsize::new(0));
        let slow = Scripted {
            delay: Duration::from_millis(500),
            ..Scripted::ok("slow")
        };
        let pipeline = pipeline_with(
            vec![Arc::new(slow)],
            exec_calls.clone(),
            Arc::new(crate::pipeline::DryRunExecutor::new()),
            20,
        );

        let trace = pipeline.run(TriggerContext::manual("test")).await.unwrap();

        let failure = trace.failure.unwrap();
        assert_eq!(failure.reason, "Timeout");
        assert!(failure.timed_out);
        assert_eq!(failure.kind, FailureKind::StepValidationFailed);
        assert!(!trace.action_attempted);
        assert_eq!(exec_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_executor_failure_is_external_action_failure() {
        let exec_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(
            vec![Arc::new(Scripted::ok("a"))],
            exec_calls.clone(),
            Arc::new(FailingExecutor),
            1_000,
        );

        let trace = pipeline.run(TriggerContext::manual("test")).await.unwrap();

        let failure = trace.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::ExternalActionFailed);
        assert_eq!(failure.step_index, 2);
        assert_eq!(failure.reason, "TransportError");
        assert!(trace.action_attempted);
        assert!(trace.order_id.is_none());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = PipelineConfig {
            history_len: 2,
            ..PipelineConfig::default()
        };
        let pipeline = ValidationPipeline::builder(config, GlobalStore::with_defaults())
            .step(Arc::new(Scripted::failing("a", "Nope")))
            .execution(Arc::new(PlaceFixed {
                calls: Arc::new(AtomicUsize::new(0)),
            }))
            .executor(Arc::new(crate::pipeline::DryRunExecutor::new()))
            .build()
            .unwrap();

        for _ in 0..3 {
            pipeline.run(TriggerContext::scheduled()).await.unwrap();
        }

        let history = pipeline.recent_traces();
        assert_eq!(history.len(), 2);
        assert_eq!(
            pipeline.get_trace().unwrap().run_id,
            history[1].run_id
        );
    }

    #[tokio::test]
    async fn test_dropped_run_is_sealed_as_abandoned() {
        let slow = Scripted {
            delay: Duration::from_secs(30),
            ..Scripted::ok("slow")
        };
        let pipeline = pipeline_with(
            vec![Arc::new(slow)],
            Arc::new(AtomicUsize::new(0)),
            Arc::new(crate::pipeline::DryRunExecutor::new()),
            60_000,
        );
        let mut events = pipeline.subscribe();

        let handle = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(TriggerContext::manual("test")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pipeline.is_running());
        handle.abort();

        tokio::time::timeout(Duration::from_secs(2), pipeline.wait_idle())
            .await
            .expect("abort should release the pipeline");

        assert!(!pipeline.is_running());
        let trace = pipeline.get_trace().unwrap();
        assert_eq!(trace.status, TraceStatus::Complete);
        assert!(!trace.success);
        assert_eq!(trace.statuses(), vec![StepStatus::Failed, StepStatus::Pending]);
        let failure = trace.failure.unwrap();
        assert_eq!(failure.reason, "Abandoned");
        assert_eq!(failure.kind, FailureKind::StepValidationFailed);
        assert_eq!(pipeline.recent_traces().len(), 1);

        let mut finished = None;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::RunFinished(t) = event {
                finished = Some(t);
            }
        }
        assert_eq!(finished.unwrap().failure.unwrap().reason, "Abandoned");

        // The slot is free: the next run starts instead of being rejected,
        // and dropping it on timeout abandons it the same way
        let next = tokio::time::timeout(
            Duration::from_millis(100),
            pipeline.run(TriggerContext::manual("next")),
        )
        .await;
        assert!(next.is_err());
        let history = pipeline.recent_traces();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].trigger.requested_by, "next");
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_wait_idle_returns_after_run() {
        let slow = Scripted {
            delay: Duration::from_millis(50),
            ..Scripted::ok("slow")
        };
        let pipeline = pipeline_with(
            vec![Arc::new(slow)],
            Arc::new(AtomicUsize::new(0)),
            Arc::new(crate::pipeline::DryRunExecutor::new()),
            1_000,
        );

        // Idle pipeline returns at once
        tokio::time::timeout(Duration::from_millis(100), pipeline.wait_idle())
            .await
            .unwrap();

        let handle = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(TriggerContext::manual("test")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pipeline.is_running());

        tokio::time::timeout(Duration::from_secs(2), pipeline.wait_idle())
            .await
            .unwrap();
        assert!(!pipeline.is_running());
        assert!(pipeline.get_trace().unwrap().success);
        assert!(handle.await.unwrap().unwrap().success);
    }

    #[test]
    fn test_build_requires_execution_step() {
        let result = ValidationPipeline::builder(PipelineConfig::default(), GlobalStore::with_defaults())
            .step(Arc::new(Scripted::ok("a")))
            .executor(Arc::new(crate::pipeline::DryRunExecutor::new()))
            .build();
        assert!(matches!(result, Err(HiveError::InvalidConfig(_))));
    }
}
