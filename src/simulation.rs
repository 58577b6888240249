//! Simulated producers for the CLI
//!
//! Stands in for the real analysis subsystems: each one heartbeats into the
//! bus with a jittered coherence, and a market feed random-walks the price
//! and indicators in the store.

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::coordination::ShutdownToken;
use crate::hive::HiveBus;
use crate::store::{GlobalStore, StatePatch};

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub subsystems: Vec<String>,
    /// Mean coherence reported by every subsystem
    pub coherence: f64,
    pub heartbeat_every: Duration,
    pub market_every: Duration,
    pub start_price: f64,
    pub balance_usd: Decimal,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            subsystems: ["sentiment", "technical", "onchain", "momentum"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            coherence: 0.8,
            heartbeat_every: Duration::from_secs(2),
            market_every: Duration::from_secs(1),
            start_price: 100.0,
            balance_usd: Decimal::new(1_000, 0),
        }
    }
}

pub struct Simulation {
    config: SimulationConfig,
    bus: HiveBus,
    store: GlobalStore,
}

impl Simulation {
    pub fn new(config: SimulationConfig, bus: HiveBus, store: GlobalStore) -> Self {
        Self { config, bus, store }
    }

    /// Register the subsystems and write one heartbeat and market tick each,
    /// so a pipeline run right after sees a complete picture
    pub async fn seed(&self) {
        for id in &self.config.subsystems {
            self.bus.register(id).await;
            self.bus.heartbeat(id, self.config.coherence).await;
        }

        let mut patch = market_tick(self.config.start_price, &mut rand::thread_rng());
        patch = patch.balance_usd(self.config.balance_usd);
        self.store.set_partial_state(patch).await;
        info!(
            "Simulation seeded: {} subsystems, price {}",
            self.config.subsystems.len(),
            self.config.start_price
        );
    }

    /// Keep heartbeats and market ticks flowing until shutdown
    pub fn spawn(self, mut shutdown: ShutdownToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(self.config.heartbeat_every);
            let mut market = tokio::time::interval(self.config.market_every);
            let mut price = self.config.start_price;

            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        for id in &self.config.subsystems {
                            let jitter = rand::thread_rng().gen_range(-0.1..0.1);
                            self.bus.heartbeat(id, self.config.coherence + jitter).await;
                        }
                    }
                    _ = market.tick() => {
                        let patch = {
                            let mut rng = rand::thread_rng();
                            price *= 1.0 + rng.gen_range(-0.005..0.005);
                            market_tick(price, &mut rng)
                        };
                        self.store.set_partial_state(patch).await;
                    }
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }
            debug!("Simulation stopped");
        })
    }
}

fn market_tick<R: Rng>(price: f64, rng: &mut R) -> StatePatch {
    let mut patch = StatePatch::new()
        .price_change_pct(rng.gen_range(-2.0..3.0))
        .volatility(rng.gen_range(0.1..0.4))
        .sentiment(rng.gen_range(-0.2..0.8))
        .signal_strength(rng.gen_range(0.2..0.9));
    if let Some(p) = Decimal::from_f64(price) {
        patch = patch.market_price(p.round_dp(4));
    }
    patch
}
