//! Validation Trace: per-run, per-step audit record

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::executor::OrderSide;
use super::step::TriggerContext;
use crate::error::{Result, StepError};

/// Step lifecycle: Pending -> Running -> {Success, Failed}, never backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl StepStatus {
    pub fn is_concluded(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "PENDING"),
            StepStatus::Running => write!(f, "RUNNING"),
            StepStatus::Success => write!(f, "SUCCESS"),
            StepStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Scalar value in a flattened step output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<usize> for Scalar {
    fn from(v: usize) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<Decimal> for Scalar {
    fn from(v: Decimal) -> Self {
        Scalar::Float(v.to_f64().unwrap_or_default())
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataOutput {
    pub price: Decimal,
    pub volatility: f64,
    pub price_change_pct: f64,
    pub data_age_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutput {
    pub coherence: f64,
    pub active_subsystems: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalOutput {
    pub side: OrderSide,
    /// Composite score in [-1, 1]
    pub score: f64,
    /// Score magnitude scaled by coherence, in [0, 1]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskOutput {
    pub max_notional_usd: Decimal,
    pub available_balance_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingOutput {
    pub side: OrderSide,
    pub notional_usd: Decimal,
    pub quantity: Decimal,
    pub limit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub order_id: String,
    pub side: OrderSide,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub elapsed_ms: u64,
}

/// Typed output of one step, fed forward to later steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    MarketData(MarketDataOutput),
    Consensus(ConsensusOutput),
    Signal(SignalOutput),
    Risk(RiskOutput),
    Sizing(SizingOutput),
    Execution(ExecutionOutput),
    /// Output of custom steps
    Custom(BTreeMap<String, Scalar>),
}

impl StepOutput {
    /// Flat key -> scalar view for display
    pub fn to_scalars(&self) -> BTreeMap<String, Scalar> {
        let mut map = BTreeMap::new();
        match self {
            StepOutput::MarketData(o) => {
                map.insert("price".into(), o.price.into());
                map.insert("volatility".into(), o.volatility.into());
                map.insert("price_change_pct".into(), o.price_change_pct.into());
                map.insert("data_age_secs".into(), o.data_age_secs.into());
            }
            StepOutput::Consensus(o) => {
                map.insert("coherence".into(), o.coherence.into());
                map.insert("active_subsystems".into(), o.active_subsystems.into());
            }
            StepOutput::Signal(o) => {
                map.insert("side".into(), o.side.to_string().into());
                map.insert("score".into(), o.score.into());
                map.insert("confidence".into(), o.confidence.into());
            }
            StepOutput::Risk(o) => {
                map.insert("max_notional_usd".into(), o.max_notional_usd.into());
                map.insert("available_balance_usd".into(), o.available_balance_usd.into());
            }
            StepOutput::Sizing(o) => {
                map.insert("side".into(), o.side.to_string().into());
                map.insert("notional_usd".into(), o.notional_usd.into());
                map.insert("quantity".into(), o.quantity.into());
                map.insert("limit_price".into(), o.limit_price.into());
            }
            StepOutput::Execution(o) => {
                map.insert("order_id".into(), o.order_id.clone().into());
                map.insert("side".into(), o.side.to_string().into());
                map.insert("filled_quantity".into(), o.filled_quantity.into());
                if let Some(price) = o.avg_fill_price {
                    map.insert("avg_fill_price".into(), price.into());
                }
                map.insert("elapsed_ms".into(), (o.elapsed_ms as i64).into());
            }
            StepOutput::Custom(values) => map.extend(values.clone()),
        }
        map
    }
}

/// One step of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStep {
    /// 1-based position in the pipeline
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub output: Option<StepOutput>,
    pub error: Option<String>,
    pub error_details: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ValidationStep {
    pub(crate) fn pending(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            error_details: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, StepStatus::Pending);
        self.status = StepStatus::Running;
        self.started_at = Some(now);
    }

    pub(crate) fn succeed(&mut self, output: StepOutput, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, StepStatus::Running);
        self.status = StepStatus::Success;
        self.output = Some(output);
        self.ended_at = Some(now);
    }

    pub(crate) fn fail(&mut self, error: &StepError, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, StepStatus::Running);
        self.status = StepStatus::Failed;
        self.error = Some(error.reason());
        self.error_details = error.details();
        self.ended_at = Some(now);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceStatus {
    Running,
    Complete,
}

/// How a failed run should be handled downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A step failed before any side effect was attempted
    StepValidationFailed,
    /// The external action was attempted and failed; its real outcome is
    /// unknown and needs reconciliation
    ExternalActionFailed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::StepValidationFailed => write!(f, "StepValidationFailed"),
            FailureKind::ExternalActionFailed => write!(f, "ExternalActionFailed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFailure {
    pub step_index: usize,
    pub step_name: String,
    pub kind: FailureKind,
    pub reason: String,
    pub timed_out: bool,
}

/// Ordered record of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationTrace {
    pub run_id: String,
    pub trigger: TriggerContext,
    pub status: TraceStatus,
    pub success: bool,
    pub steps: Vec<ValidationStep>,
    pub failure: Option<TraceFailure>,
    /// Whether the execution step actually called the executor
    pub action_attempted: bool,
    pub order_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ValidationTrace {
    pub(crate) fn new(
        run_id: String,
        trigger: TriggerContext,
        step_names: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            trigger,
            status: TraceStatus::Running,
            success: false,
            steps: step_names
                .iter()
                .enumerate()
                .map(|(i, name)| ValidationStep::pending(i + 1, name))
                .collect(),
            failure: None,
            action_attempted: false,
            order_id: None,
            started_at: now,
            ended_at: None,
        }
    }

    pub(crate) fn seal(&mut self, now: DateTime<Utc>) {
        self.success = self.failure.is_none()
            && self.steps.iter().all(|s| s.status == StepStatus::Success);
        self.status = TraceStatus::Complete;
        self.ended_at = Some(now);
    }

    pub fn is_complete(&self) -> bool {
        self.status == TraceStatus::Complete
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.steps.iter().map(|s| s.status).collect()
    }

    pub fn failed_step(&self) -> Option<&ValidationStep> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    pub fn step(&self, name: &str) -> Option<&ValidationStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Pretty JSON for audit sinks and the CLI
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Seal a run whose caller stopped polling it mid-step. The interrupted
    /// step fails with `Abandoned`; later steps stay PENDING.
    pub(crate) fn abandon(&mut self, action_attempted: bool, now: DateTime<Utc>) {
        let Some(idx) = self
            .steps
            .iter()
            .position(|s| s.status == StepStatus::Running)
            .or_else(|| self.steps.iter().position(|s| s.status == StepStatus::Pending))
        else {
            self.seal(now);
            return;
        };

        let is_execution = idx + 1 == self.steps.len();
        let step = &mut self.steps[idx];
        if step.status == StepStatus::Pending {
            step.start(now);
        }
        let err = StepError::rejected_with("Abandoned", "run future dropped before completion");
        step.fail(&err, now);

        self.failure = Some(TraceFailure {
            step_index: idx + 1,
            step_name: step.name.clone(),
            kind: if is_execution && action_attempted {
                FailureKind::ExternalActionFailed
            } else {
                FailureKind::StepValidationFailed
            },
            reason: err.reason(),
            timed_out: false,
        });
        self.action_attempted = action_attempted;
        self.seal(now);
    }
}
