use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub hive: HiveConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
}

/// Liveness tunables for the coordination bus
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    /// Seconds without a heartbeat before a subsystem turns stale
    pub stale_after_secs: u64,
    /// Seconds without a heartbeat before a subsystem turns offline
    pub offline_after_secs: u64,
    /// Fraction of the base weight a stale subsystem keeps (0 = drops out)
    pub stale_weight_factor: f64,
    /// Weight given to subsystems registered without an explicit weight
    pub default_weight: f64,
    /// Upper bound for any registered weight; larger values are capped
    pub max_weight: f64,
    /// Interval of the background liveness sweep
    pub sweep_interval_ms: u64,
    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 10,
            offline_after_secs: 60,
            stale_weight_factor: 0.0,
            default_weight: 1.0,
            max_weight: 100.0,
            sweep_interval_ms: 1_000,
            event_buffer: 256,
        }
    }
}

impl HiveConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn offline_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.offline_after_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of the change notification channel
    pub event_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Default per-step timeout
    pub step_timeout_ms: u64,
    /// Timeout for the external action in the execution step
    pub execution_timeout_ms: u64,
    /// Number of sealed traces kept for display
    pub history_len: usize,
    /// Minimum hive-mind coherence required to trade
    pub min_coherence: f64,
    /// Minimum number of active subsystems required to trade
    pub min_active_subsystems: usize,
    /// Minimum aggregated signal confidence required to trade
    pub min_signal_confidence: f64,
    /// Maximum age of the market data in the store snapshot
    pub max_data_age_secs: u64,
    /// Interval of the scheduled trigger
    pub auto_run_interval_ms: u64,
    /// Capacity of the pipeline event channel
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 2_000,
            execution_timeout_ms: 5_000,
            history_len: 50,
            min_coherence: 0.5,
            min_active_subsystems: 1,
            min_signal_confidence: 0.3,
            max_data_age_secs: 30,
            auto_run_interval_ms: 15_000,
            event_buffer: 128,
        }
    }
}

impl PipelineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn auto_run_interval(&self) -> Duration {
        Duration::from_millis(self.auto_run_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum notional per order in USD
    pub max_notional_usd: Decimal,
    /// Daily loss limit in USD (absolute value)
    pub daily_loss_limit_usd: Decimal,
    /// Maximum concurrent open positions (0 = unlimited)
    pub max_open_positions: u32,
    /// Minimum balance to maintain (won't trade if balance below this)
    pub min_balance_usd: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_notional_usd: dec!(100),
            daily_loss_limit_usd: dec!(500),
            max_open_positions: 3,
            min_balance_usd: dec!(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DryRunConfig {
    /// Enable dry run mode (no real orders)
    pub enabled: bool,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("HIVEGATE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (HIVEGATE_HIVE__STALE_AFTER_SECS, etc.)
            .add_source(
                Environment::with_prefix("HIVEGATE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load from `config_dir` and reject it unless `validate()` passes
    pub fn load_validated<P: AsRef<Path>>(config_dir: P) -> crate::error::Result<Self> {
        let config = Self::load_from(config_dir)?;
        config
            .validate()
            .map_err(|errors| crate::error::HiveError::InvalidConfig(errors.join("; ")))?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.hive.stale_after_secs == 0 {
            errors.push("hive.stale_after_secs must be positive".to_string());
        }

        if self.hive.offline_after_secs <= self.hive.stale_after_secs {
            errors.push(
                "hive.offline_after_secs must be greater than hive.stale_after_secs".to_string(),
            );
        }

        if !(0.0..=1.0).contains(&self.hive.stale_weight_factor) {
            errors.push("hive.stale_weight_factor must be between 0 and 1".to_string());
        }

        if !self.hive.default_weight.is_finite() || self.hive.default_weight < 0.0 {
            errors.push("hive.default_weight must be a non-negative number".to_string());
        }

        if !self.hive.max_weight.is_finite() || self.hive.max_weight <= 0.0 {
            errors.push("hive.max_weight must be a positive finite number".to_string());
        } else if self.hive.default_weight > self.hive.max_weight {
            errors.push("hive.default_weight must not exceed hive.max_weight".to_string());
        }

        if self.hive.sweep_interval_ms == 0 {
            errors.push("hive.sweep_interval_ms must be positive".to_string());
        }

        if self.pipeline.step_timeout_ms == 0 || self.pipeline.execution_timeout_ms == 0 {
            errors.push("pipeline timeouts must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.pipeline.min_coherence) {
            errors.push("pipeline.min_coherence must be between 0 and 1".to_string());
        }

        if self.risk.max_notional_usd <= Decimal::ZERO {
            errors.push("risk.max_notional_usd must be positive".to_string());
        }

        if self.risk.daily_loss_limit_usd <= Decimal::ZERO {
            errors.push("risk.daily_loss_limit_usd must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
