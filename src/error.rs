use thiserror::Error;

/// Main error type for the coordination core
#[derive(Error, Debug)]
pub enum HiveError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Bus errors (logged, never returned to producers)
    #[error("Unknown subsystem: {0}")]
    UnknownSubsystem(String),

    // Pipeline errors
    #[error("Pipeline run already in progress (run {run_id})")]
    ConcurrentRunRejected { run_id: String },
}

/// Result type alias for HiveError
pub type Result<T> = std::result::Result<T, HiveError>;

/// Reasons a single pipeline step can fail
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Handler rejected its inputs. The reason is a short machine-friendly tag
    /// such as `InsufficientCoherence`.
    #[error("{reason}")]
    Rejected {
        reason: String,
        details: Option<String>,
    },

    #[error("Timeout")]
    Timeout { elapsed_ms: u64 },

    #[error("Panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Execution(#[from] ExecutionError),
}

impl StepError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        StepError::Rejected {
            reason: reason.into(),
            details: None,
        }
    }

    pub fn rejected_with(reason: impl Into<String>, details: impl Into<String>) -> Self {
        StepError::Rejected {
            reason: reason.into(),
            details: Some(details.into()),
        }
    }

    /// Short reason recorded on the trace
    pub fn reason(&self) -> String {
        match self {
            StepError::Rejected { reason, .. } => reason.clone(),
            StepError::Timeout { .. } => "Timeout".to_string(),
            StepError::Panicked(_) => "Panicked".to_string(),
            StepError::Execution(e) => e.reason().to_string(),
        }
    }

    /// Extra context, if any, recorded next to the reason
    pub fn details(&self) -> Option<String> {
        match self {
            StepError::Rejected { details, .. } => details.clone(),
            StepError::Timeout { elapsed_ms } => Some(format!("after {}ms", elapsed_ms)),
            StepError::Panicked(msg) => Some(msg.clone()),
            StepError::Execution(e) => Some(e.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            StepError::Timeout { .. } | StepError::Execution(ExecutionError::Timeout { .. })
        )
    }
}

/// Errors reported by an action executor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Order timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ExecutionError {
    pub fn reason(&self) -> &'static str {
        match self {
            ExecutionError::Rejected(_) => "OrderRejected",
            ExecutionError::Timeout { .. } => "Timeout",
            ExecutionError::Transport(_) => "TransportError",
        }
    }
}
