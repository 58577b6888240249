//! Global State: the shared snapshot producers merge into

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Platform-wide state merged from partial updates of many producers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Run mode; only `start_trading` / `stop_trading` change it
    pub is_active: bool,
    pub market_price: Option<Decimal>,
    /// When the market fields were last refreshed
    pub market_updated_at: Option<DateTime<Utc>>,
    pub price_change_pct: f64,
    pub volatility: f64,
    /// Market sentiment in [-1, 1]
    pub sentiment: f64,
    /// Directional signal strength in [-1, 1]
    pub signal_strength: f64,
    /// Mirrored from the hive bus aggregate
    pub hive_mind_coherence: f64,
    pub balance_usd: Decimal,
    pub daily_pnl_usd: Decimal,
    pub open_positions: u32,
    pub last_order_id: Option<String>,
    pub last_trade_at: Option<DateTime<Utc>>,
    /// Free-form producer metrics, merged per key
    pub metrics: BTreeMap<String, f64>,
    /// Incremented once per accepted merge
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self {
            is_active: false,
            market_price: None,
            market_updated_at: None,
            price_change_pct: 0.0,
            volatility: 0.0,
            sentiment: 0.0,
            signal_strength: 0.0,
            hive_mind_coherence: 0.0,
            balance_usd: Decimal::ZERO,
            daily_pnl_usd: Decimal::ZERO,
            open_positions: 0,
            last_order_id: None,
            last_trade_at: None,
            metrics: BTreeMap::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Seconds since the market fields were refreshed
    pub fn market_data_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.market_updated_at
            .map(|at| now.signed_duration_since(at).num_seconds())
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial update. Every `Some` field overwrites the stored value
/// (last write wins per field); `metrics` merge key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    pub market_price: Option<Decimal>,
    pub market_updated_at: Option<DateTime<Utc>>,
    pub price_change_pct: Option<f64>,
    pub volatility: Option<f64>,
    pub sentiment: Option<f64>,
    pub signal_strength: Option<f64>,
    pub hive_mind_coherence: Option<f64>,
    pub balance_usd: Option<Decimal>,
    pub daily_pnl_usd: Option<Decimal>,
    pub open_positions: Option<u32>,
    pub last_order_id: Option<String>,
    pub last_trade_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn market_price(mut self, price: Decimal) -> Self {
        self.market_price = Some(price);
        self
    }

    pub fn market_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.market_updated_at = Some(at);
        self
    }

    pub fn price_change_pct(mut self, pct: f64) -> Self {
        self.price_change_pct = Some(pct);
        self
    }

    pub fn volatility(mut self, volatility: f64) -> Self {
        self.volatility = Some(volatility);
        self
    }

    pub fn sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn signal_strength(mut self, strength: f64) -> Self {
        self.signal_strength = Some(strength);
        self
    }

    pub fn hive_mind_coherence(mut self, coherence: f64) -> Self {
        self.hive_mind_coherence = Some(coherence);
        self
    }

    pub fn balance_usd(mut self, balance: Decimal) -> Self {
        self.balance_usd = Some(balance);
        self
    }

    pub fn daily_pnl_usd(mut self, pnl: Decimal) -> Self {
        self.daily_pnl_usd = Some(pnl);
        self
    }

    pub fn open_positions(mut self, count: u32) -> Self {
        self.open_positions = Some(count);
        self
    }

    pub fn last_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.last_order_id = Some(order_id.into());
        self
    }

    pub fn last_trade_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_trade_at = Some(at);
        self
    }

    pub fn metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    /// Names of the fields this patch writes
    pub fn touched_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        let mut touch = |set: bool, name: &str| {
            if set {
                fields.push(name.to_string());
            }
        };
        touch(self.market_price.is_some(), "market_price");
        touch(self.market_updated_at.is_some(), "market_updated_at");
        touch(self.price_change_pct.is_some(), "price_change_pct");
        touch(self.volatility.is_some(), "volatility");
        touch(self.sentiment.is_some(), "sentiment");
        touch(self.signal_strength.is_some(), "signal_strength");
        touch(self.hive_mind_coherence.is_some(), "hive_mind_coherence");
        touch(self.balance_usd.is_some(), "balance_usd");
        touch(self.daily_pnl_usd.is_some(), "daily_pnl_usd");
        touch(self.open_positions.is_some(), "open_positions");
        touch(self.last_order_id.is_some(), "last_order_id");
        touch(self.last_trade_at.is_some(), "last_trade_at");
        fields.extend(self.metrics.keys().map(|k| format!("metrics.{}", k)));
        fields
    }

    /// Merge into `state`. A new market price without an explicit
    /// timestamp refreshes `market_updated_at` to `now`.
    pub(crate) fn apply_to(self, state: &mut GlobalState, now: DateTime<Utc>) {
        if let Some(price) = self.market_price {
            state.market_price = Some(price);
            state.market_updated_at = Some(self.market_updated_at.unwrap_or(now));
        } else if let Some(at) = self.market_updated_at {
            state.market_updated_at = Some(at);
        }
        if let Some(v) = self.price_change_pct {
            state.price_change_pct = v;
        }
        if let Some(v) = self.volatility {
            state.volatility = v;
        }
        if let Some(v) = self.sentiment {
            state.sentiment = v;
        }
        if let Some(v) = self.signal_strength {
            state.signal_strength = v;
        }
        if let Some(v) = self.hive_mind_coherence {
            state.hive_mind_coherence = v;
        }
        if let Some(v) = self.balance_usd {
            state.balance_usd = v;
        }
        if let Some(v) = self.daily_pnl_usd {
            state.daily_pnl_usd = v;
        }
        if let Some(v) = self.open_positions {
            state.open_positions = v;
        }
        if let Some(v) = self.last_order_id {
            state.last_order_id = Some(v);
        }
        if let Some(v) = self.last_trade_at {
            state.last_trade_at = Some(v);
        }
        state.metrics.extend(self.metrics);
    }
}
