//! Action executor seam
//!
//! The execution step places orders through an `ActionExecutor`. A real
//! exchange client lives outside this crate; `DryRunExecutor` simulates fills.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::error::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order handed to the executor by the execution step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Idempotency key, one per pipeline run
    pub client_order_id: String,
    pub run_id: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub limit_price: Decimal,
    pub notional_usd: Decimal,
}

/// Executor acknowledgement of a placed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub order_id: String,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub elapsed_ms: u64,
}

/// External side effect behind the pipeline's final step
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn is_dry_run(&self) -> bool {
        false
    }

    async fn place_order(&self, request: &OrderRequest)
        -> Result<ExecutionReceipt, ExecutionError>;
}

/// Simulated executor: fills every order in full at its limit price
pub struct DryRunExecutor {
    latency: Duration,
    orders_placed: AtomicU64,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            orders_placed: AtomicU64::new(0),
        }
    }

    pub fn orders_placed(&self) -> u64 {
        self.orders_placed.load(Ordering::SeqCst)
    }
}

impl Default for DryRunExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    async fn place_order(
        &self,
        request: &OrderRequest,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        let start = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if request.quantity <= Decimal::ZERO {
            return Err(ExecutionError::Rejected(format!(
                "non-positive quantity {}",
                request.quantity
            )));
        }

        self.orders_placed.fetch_add(1, Ordering::SeqCst);
        let order_id = format!("dry-{}", Uuid::new_v4());
        info!(
            "[DRY RUN] {} {} @ {} (${}) -> {}",
            request.side, request.quantity, request.limit_price, request.notional_usd, order_id
        );

        Ok(ExecutionReceipt {
            order_id,
            filled_quantity: request.quantity,
            avg_fill_price: Some(request.limit_price),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Wraps the real executor for one run and records whether it was called
pub(crate) struct TrackedExecutor {
    inner: Arc<dyn ActionExecutor>,
    attempted: Arc<AtomicBool>,
}

impl TrackedExecutor {
    pub(crate) fn new(inner: Arc<dyn ActionExecutor>) -> Self {
        Self {
            inner,
            attempted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn attempted(&self) -> bool {
        self.attempted.load(Ordering::SeqCst)
    }

    /// Shared view of the attempt flag, readable after the executor is gone
    pub(crate) fn attempted_flag(&self) -> Arc<AtomicBool> {
        self.attempted.clone()
    }
}

#[async_trait]
impl ActionExecutor for TrackedExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_dry_run(&self) -> bool {
        self.inner.is_dry_run()
    }

    async fn place_order(
        &self,
        request: &OrderRequest,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        self.attempted.store(true, Ordering::SeqCst);
        self.inner.place_order(request).await
    }
}
