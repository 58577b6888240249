//! Built-in pipeline steps
//!
//! market_data -> hive_consensus -> signal_aggregation -> risk_check ->
//! position_sizing -> order_execution. Real producers publish their results
//! into the store and bus; the first five steps only read and combine them.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::executor::{ActionExecutor, OrderRequest, OrderSide};
use super::step::{require, ExecutionStep, StepContext, StepHandler};
use super::trace::{
    ConsensusOutput, ExecutionOutput, MarketDataOutput, RiskOutput, SignalOutput, SizingOutput,
    StepOutput,
};
use crate::config::RiskConfig;
use crate::error::{ExecutionError, StepError};
use crate::hive::HiveBus;
use crate::store::{GlobalStore, StatePatch};

/// Step 1: ingest market data from the store snapshot
pub struct MarketDataStep {
    max_age_secs: u64,
}

impl MarketDataStep {
    pub fn new(max_age_secs: u64) -> Self {
        Self { max_age_secs }
    }
}

#[async_trait]
impl StepHandler for MarketDataStep {
    fn name(&self) -> &str {
        "market_data"
    }

    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let price = ctx
            .state
            .market_price
            .ok_or_else(|| StepError::rejected("MarketDataUnavailable"))?;

        if price <= Decimal::ZERO {
            return Err(StepError::rejected_with(
                "InvalidMarketData",
                format!("price {} is not positive", price),
            ));
        }

        let age = ctx
            .state
            .market_data_age_secs(Utc::now())
            .ok_or_else(|| StepError::rejected("MarketDataUnavailable"))?;
        if age > self.max_age_secs as i64 {
            return Err(StepError::rejected_with(
                "StaleMarketData",
                format!("age={}s, max={}s", age, self.max_age_secs),
            ));
        }

        Ok(StepOutput::MarketData(MarketDataOutput {
            price,
            volatility: ctx.state.volatility,
            price_change_pct: ctx.state.price_change_pct,
            data_age_secs: age.max(0),
        }))
    }
}

/// Step 2: require a coherent, quorate hive
pub struct HiveConsensusStep {
    bus: HiveBus,
    min_coherence: f64,
    min_active: usize,
}

impl HiveConsensusStep {
    pub fn new(bus: HiveBus, min_coherence: f64, min_active: usize) -> Self {
        Self {
            bus,
            min_coherence,
            min_active,
        }
    }
}

#[async_trait]
impl StepHandler for HiveConsensusStep {
    fn name(&self) -> &str {
        "hive_consensus"
    }

    async fn run(&self, _ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let hive = self.bus.snapshot().await;

        if hive.active_count() < self.min_active {
            return Err(StepError::rejected_with(
                "InsufficientQuorum",
                format!("active={}, min={}", hive.active_count(), self.min_active),
            ));
        }

        if hive.hive_mind_coherence.is_nan() || hive.hive_mind_coherence < self.min_coherence {
            return Err(StepError::rejected_with(
                "InsufficientCoherence",
                format!(
                    "coherence={:.3}, min={:.3}",
                    hive.hive_mind_coherence, self.min_coherence
                ),
            ));
        }

        Ok(StepOutput::Consensus(ConsensusOutput {
            coherence: hive.hive_mind_coherence,
            active_subsystems: hive.active_count(),
        }))
    }
}

/// Step 3: fold signal, sentiment and momentum into a direction
pub struct SignalAggregationStep {
    min_confidence: f64,
}

impl SignalAggregationStep {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    /// Composite score in [-1, 1]
    pub fn score(signal_strength: f64, sentiment: f64, price_change_pct: f64) -> f64 {
        let momentum = (price_change_pct / 5.0).clamp(-1.0, 1.0);
        let score = 0.5 * signal_strength.clamp(-1.0, 1.0)
            + 0.3 * sentiment.clamp(-1.0, 1.0)
            + 0.2 * momentum;
        if score.is_nan() {
            0.0
        } else {
            score
        }
    }
}

#[async_trait]
impl StepHandler for SignalAggregationStep {
    fn name(&self) -> &str {
        "signal_aggregation"
    }

    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let market = require(ctx.market_data(), "MarketData")?;
        let consensus = require(ctx.consensus(), "Consensus")?;

        let score = Self::score(
            ctx.state.signal_strength,
            ctx.state.sentiment,
            market.price_change_pct,
        );
        let confidence = (score.abs() * consensus.coherence).clamp(0.0, 1.0);

        if confidence < self.min_confidence {
            return Err(StepError::rejected_with(
                "NoSignal",
                format!(
                    "confidence={:.3}, min={:.3}",
                    confidence, self.min_confidence
                ),
            ));
        }

        let side = if score >= 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        debug!("Signal {} score={:.3} confidence={:.3}", side, score, confidence);

        Ok(StepOutput::Signal(SignalOutput {
            side,
            score,
            confidence,
        }))
    }
}

/// Step 4: account-level risk gates
pub struct RiskCheckStep {
    risk: RiskConfig,
}

impl RiskCheckStep {
    pub fn new(risk: RiskConfig) -> Self {
        Self { risk }
    }
}

#[async_trait]
impl StepHandler for RiskCheckStep {
    fn name(&self) -> &str {
        "risk_check"
    }

    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let state = ctx.state;

        if !state.is_active {
            return Err(StepError::rejected("TradingDisabled"));
        }

        if state.daily_pnl_usd <= -self.risk.daily_loss_limit_usd {
            return Err(StepError::rejected_with(
                "DailyLossLimit",
                format!(
                    "pnl=${}, limit=${}",
                    state.daily_pnl_usd, self.risk.daily_loss_limit_usd
                ),
            ));
        }

        if self.risk.max_open_positions > 0 && state.open_positions >= self.risk.max_open_positions
        {
            return Err(StepError::rejected_with(
                "MaxPositions",
                format!(
                    "open={}, max={}",
                    state.open_positions, self.risk.max_open_positions
                ),
            ));
        }

        if state.balance_usd <= self.risk.min_balance_usd {
            return Err(StepError::rejected_with(
                "InsufficientBalance",
                format!(
                    "balance=${}, min=${}",
                    state.balance_usd, self.risk.min_balance_usd
                ),
            ));
        }

        let available = state.balance_usd - self.risk.min_balance_usd;
        Ok(StepOutput::Risk(RiskOutput {
            max_notional_usd: self.risk.max_notional_usd.min(available),
            available_balance_usd: available,
        }))
    }
}

/// Step 5: size the order from risk headroom and signal confidence
pub struct PositionSizingStep;

#[async_trait]
impl StepHandler for PositionSizingStep {
    fn name(&self) -> &str {
        "position_sizing"
    }

    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let market = require(ctx.market_data(), "MarketData")?;
        let signal = require(ctx.signal(), "Signal")?;
        let risk = require(ctx.risk(), "Risk")?;

        let confidence = Decimal::from_f64(signal.confidence).unwrap_or(Decimal::ZERO);
        let notional = (risk.max_notional_usd * confidence).round_dp(2);
        let quantity = (notional / market.price).round_dp(4);

        if quantity <= Decimal::ZERO {
            return Err(StepError::rejected_with(
                "ZeroSize",
                format!("notional=${}, price={}", notional, market.price),
            ));
        }

        Ok(StepOutput::Sizing(SizingOutput {
            side: signal.side,
            notional_usd: notional,
            quantity,
            limit_price: market.price,
        }))
    }
}

/// Step 6: place the order and record it in the store
pub struct OrderExecutionStep {
    store: GlobalStore,
    order_timeout: Duration,
}

impl OrderExecutionStep {
    pub fn new(store: GlobalStore, order_timeout: Duration) -> Self {
        Self {
            store,
            order_timeout,
        }
    }
}

#[async_trait]
impl ExecutionStep for OrderExecutionStep {
    fn name(&self) -> &str {
        "order_execution"
    }

    // The pipeline-level timeout must outlast the order timeout so a slow
    // executor is reported as an order timeout
    fn timeout(&self) -> Option<Duration> {
        Some(self.order_timeout + Duration::from_secs(1))
    }

    async fn execute(
        &self,
        ctx: &StepContext<'_>,
        executor: &dyn ActionExecutor,
    ) -> Result<StepOutput, StepError> {
        let sizing = require(ctx.sizing(), "Sizing")?;

        let request = OrderRequest {
            client_order_id: Uuid::new_v4().to_string(),
            run_id: ctx.run_id.to_string(),
            side: sizing.side,
            quantity: sizing.quantity,
            limit_price: sizing.limit_price,
            notional_usd: sizing.notional_usd,
        };

        let start = Instant::now();
        let receipt = match tokio::time::timeout(self.order_timeout, executor.place_order(&request))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExecutionError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                }
                .into())
            }
        };

        info!(
            "Order {} placed via {}: {} {} @ {:?}",
            receipt.order_id,
            executor.name(),
            request.side,
            receipt.filled_quantity,
            receipt.avg_fill_price
        );

        // The snapshot in ctx predates the order; count from the live state
        let order_id = receipt.order_id.clone();
        self.store
            .update_with(|current| {
                StatePatch::new()
                    .last_order_id(order_id)
                    .last_trade_at(Utc::now())
                    .open_positions(current.open_positions.saturating_add(1))
            })
            .await;

        Ok(StepOutput::Execution(ExecutionOutput {
            order_id: receipt.order_id,
            side: request.side,
            filled_quantity: receipt.filled_quantity,
            avg_fill_price: receipt.avg_fill_price,
            elapsed_ms: receipt.elapsed_ms,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::TriggerContext;
    use crate::store::GlobalState;
    use rust_decimal_macros::dec;

    fn ctx<'a>(
        prior: &'a [StepOutput],
        state: &'a GlobalState,
        trigger: &'a TriggerContext,
    ) -> StepContext<'a> {
        StepContext {
            run_id: "run-test",
            prior,
            state,
            trigger,
        }
    }

    fn market(price: Decimal) -> StepOutput {
        StepOutput::MarketData(MarketDataOutput {
            price,
            volatility: 0.1,
            price_change_pct: 0.0,
            data_age_secs: 0,
        })
    }

    #[tokio::test]
    async fn test_market_data_requires_price() {
        let state = GlobalState::new();
        let trigger = TriggerContext::manual("test");
        let err = MarketDataStep::new(30)
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "MarketDataUnavailable");
    }

    #[tokio::test]
    async fn test_market_data_rejects_stale() {
        let mut state = GlobalState::new();
        state.market_price = Some(dec!(100));
        state.market_updated_at = Some(Utc::now() - chrono::Duration::seconds(120));
        let trigger = TriggerContext::manual("test");

        let err = MarketDataStep::new(30)
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "StaleMarketData");
    }

    #[tokio::test]
    async fn test_consensus_rejects_low_coherence() {
        let bus = HiveBus::with_defaults();
        bus.register("a").await;
        bus.heartbeat("a", 0.2).await;
        let state = GlobalState::new();
        let trigger = TriggerContext::manual("test");

        let err = HiveConsensusStep::new(bus, 0.5, 1)
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "InsufficientCoherence");
    }

    #[tokio::test]
    async fn test_consensus_rejects_missing_quorum() {
        let bus = HiveBus::with_defaults();
        let state = GlobalState::new();
        let trigger = TriggerContext::manual("test");

        let err = HiveConsensusStep::new(bus, 0.0, 1)
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "InsufficientQuorum");
    }

    #[test]
    fn test_signal_score_bounds() {
        assert!((SignalAggregationStep::score(1.0, 1.0, 50.0) - 1.0).abs() < 1e-9);
        assert!((SignalAggregationStep::score(-1.0, -1.0, -50.0) + 1.0).abs() < 1e-9);
        assert_eq!(SignalAggregationStep::score(f64::NAN, 0.0, 0.0), 0.0);
    }

    #[tokio::test]
    async fn test_signal_picks_sell_on_negative_score() {
        let mut state = GlobalState::new();
        state.signal_strength = -0.9;
        state.sentiment = -0.5;
        let trigger = TriggerContext::manual("test");
        let prior = vec![
            market(dec!(100)),
            StepOutput::Consensus(ConsensusOutput {
                coherence: 0.9,
                active_subsystems: 3,
            }),
        ];

        let out = SignalAggregationStep::new(0.1)
            .run(&ctx(&prior, &state, &trigger))
            .await
            .unwrap();
        match out {
            StepOutput::Signal(signal) => assert_eq!(signal.side, OrderSide::Sell),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_risk_check_gates() {
        let risk = RiskConfig::default();
        let trigger = TriggerContext::manual("test");

        let mut state = GlobalState::new();
        state.balance_usd = dec!(1000);
        let err = RiskCheckStep::new(risk.clone())
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "TradingDisabled");

        state.is_active = true;
        state.daily_pnl_usd = dec!(-600);
        let err = RiskCheckStep::new(risk.clone())
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "DailyLossLimit");

        state.daily_pnl_usd = Decimal::ZERO;
        state.open_positions = 3;
        let err = RiskCheckStep::new(risk.clone())
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "MaxPositions");

        state.open_positions = 0;
        let out = RiskCheckStep::new(risk)
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap();
        assert_eq!(
            out,
            StepOutput::Risk(RiskOutput {
                max_notional_usd: dec!(100),
                available_balance_usd: dec!(990),
            })
        );
    }

    #[tokio::test]
    async fn test_sizing_scales_by_confidence() {
        let state = GlobalState::new();
        let trigger = TriggerContext::manual("test");
        let prior = vec![
            market(dec!(50)),
            StepOutput::Signal(SignalOutput {
                side: OrderSide::Buy,
                score: 0.8,
                confidence: 0.5,
            }),
            StepOutput::Risk(RiskOutput {
                max_notional_usd: dec!(100),
                available_balance_usd: dec!(500),
            }),
        ];

        let out = PositionSizingStep
            .run(&ctx(&prior, &state, &trigger))
            .await
            .unwrap();
        match out {
            StepOutput::Sizing(s) => {
                assert_eq!(s.notional_usd, dec!(50));
                assert_eq!(s.quantity, dec!(1));
                assert_eq!(s.limit_price, dec!(50));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sizing_requires_prior_outputs() {
        let state = GlobalState::new();
        let trigger = TriggerContext::manual("test");
        let err = PositionSizingStep
            .run(&ctx(&[], &state, &trigger))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "MissingMarketData");
    }

    fn sized() -> Vec<StepOutput> {
        vec![StepOutput::Sizing(SizingOutput {
            side: OrderSide::Buy,
            notional_usd: dec!(10),
            quantity: dec!(2),
            limit_price: dec!(5),
        })]
    }

    /// Opens a position elsewhere while the order is in flight
    struct ConcurrentFillExecutor {
        store: GlobalStore,
    }

    #[async_trait]
    impl ActionExecutor for ConcurrentFillExecutor {
        fn name(&self) -> &str {
            "concurrent-fill"
        }

        async fn place_order(
            &self,
            request: &OrderRequest,
        ) -> Result<crate::pipeline::ExecutionReceipt, ExecutionError> {
            self.store
                .set_partial_state(StatePatch::new().open_positions(5))
                .await;
            Ok(crate::pipeline::ExecutionReceipt {
                order_id: "o-1".into(),
                filled_quantity: request.quantity,
                avg_fill_price: Some(request.limit_price),
                elapsed_ms: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_execution_counts_from_live_state() {
        let store = GlobalStore::with_defaults();
        let state = store.get_state().await;
        let trigger = TriggerContext::manual("test");
        let prior = sized();
        let executor = ConcurrentFillExecutor {
            store: store.clone(),
        };

        OrderExecutionStep::new(store.clone(), Duration::from_secs(1))
            .execute(&ctx(&prior, &state, &trigger), &executor)
            .await
            .unwrap();

        let after = store.get_state().await;
        assert_eq!(after.open_positions, 6);
        assert_eq!(after.last_order_id.as_deref(), Some("o-1"));
    }

    #[tokio::test]
    async fn test_execution_position_count_saturates() {
        let mut seeded = GlobalState::new();
        seeded.open_positions = u32::MAX;
        let store = GlobalStore::with_state(crate::config::StoreConfig::default(), seeded);
        let state = store.get_state().await;
        let trigger = TriggerContext::manual("test");
        let prior = sized();

        let out = OrderExecutionStep::new(store.clone(), Duration::from_secs(1))
            .execute(
                &ctx(&prior, &state, &trigger),
                &crate::pipeline::DryRunExecutor::new(),
            )
            .await
            .unwrap();

        assert!(matches!(out, StepOutput::Execution(_)));
        assert_eq!(store.get_state().await.open_positions, u32::MAX);
    }
}
