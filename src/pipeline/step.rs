//! Step plug-in contract
//!
//! Every step receives the outputs of all earlier steps, a fresh store
//! snapshot and the trigger context. Only the `ExecutionStep` is handed the
//! action executor, so steps before it cannot cause external side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::executor::ActionExecutor;
use super::trace::{
    ConsensusOutput, MarketDataOutput, RiskOutput, SignalOutput, SizingOutput, StepOutput,
};
use crate::error::StepError;
use crate::store::GlobalState;

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub kind: TriggerKind,
    pub requested_by: String,
    pub note: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl TriggerContext {
    pub fn manual(requested_by: &str) -> Self {
        Self {
            kind: TriggerKind::Manual,
            requested_by: requested_by.to_string(),
            note: None,
            requested_at: Utc::now(),
        }
    }

    pub fn scheduled() -> Self {
        Self {
            kind: TriggerKind::Scheduled,
            requested_by: "scheduler".to_string(),
            note: None,
            requested_at: Utc::now(),
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

/// Inputs handed to a step
pub struct StepContext<'a> {
    pub run_id: &'a str,
    pub prior: &'a [StepOutput],
    pub state: &'a GlobalState,
    pub trigger: &'a TriggerContext,
}

impl<'a> StepContext<'a> {
    pub fn market_data(&self) -> Option<&'a MarketDataOutput> {
        self.prior.iter().rev().find_map(|o| match o {
            StepOutput::MarketData(v) => Some(v),
            _ => None,
        })
    }

    pub fn consensus(&self) -> Option<&'a ConsensusOutput> {
        self.prior.iter().rev().find_map(|o| match o {
            StepOutput::Consensus(v) => Some(v),
            _ => None,
        })
    }

    pub fn signal(&self) -> Option<&'a SignalOutput> {
        self.prior.iter().rev().find_map(|o| match o {
            StepOutput::Signal(v) => Some(v),
            _ => None,
        })
    }

    pub fn risk(&self) -> Option<&'a RiskOutput> {
        self.prior.iter().rev().find_map(|o| match o {
            StepOutput::Risk(v) => Some(v),
            _ => None,
        })
    }

    pub fn sizing(&self) -> Option<&'a SizingOutput> {
        self.prior.iter().rev().find_map(|o| match o {
            StepOutput::Sizing(v) => Some(v),
            _ => None,
        })
    }
}

/// Require an earlier step's output, failing with `Missing<What>` otherwise
pub fn require<T>(value: Option<T>, what: &str) -> Result<T, StepError> {
    value.ok_or_else(|| StepError::rejected(format!("Missing{}", what)))
}

/// A read-only validation step
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Overrides the pipeline's default step timeout
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError>;
}

/// The final step, the only one allowed to act on the outside world
#[async_trait]
pub trait ExecutionStep: Send + Sync {
    fn name(&self) -> &str;

    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(
        &self,
        ctx: &StepContext<'_>,
        executor: &dyn ActionExecutor,
    ) -> Result<StepOutput, StepError>;
}
