use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Externally supplied tuning surface for the decision core.
///
/// Every threshold the core consults lives here; nothing is hardcoded in the
/// pipeline. Values load from an optional TOML file layered under
/// `CITYBOT_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Minimum combined confidence to trade at all
    pub confidence_threshold: f64,
    /// Global minimum |combined strength|; per-regime thresholds may be stricter
    pub signal_threshold: f64,
    /// Per-instrument exposure cap as a fraction of capital
    pub max_position_fraction: f64,
    /// Total book exposure cap as a fraction of capital
    pub max_total_exposure_fraction: f64,
    /// Drawdown at which sizing halves
    pub drawdown_reduced_threshold: f64,
    /// Drawdown at which new risk-increasing orders stop
    pub drawdown_halt_threshold: f64,
    /// Minimum detector confidence to swap regimes
    pub regime_confidence_threshold: f64,
    /// Rolling window for feature min-max scaling
    pub feature_window: usize,
    /// Rolling window for the detector's return series
    pub return_window: usize,
    /// Minimum distinct signals required per tick
    pub min_signal_count: usize,
    /// Base order size as a fraction of capital, before scaling
    pub base_size_fraction: f64,
    /// Consecutive sub-threshold ticks before the regime resets to Uncertain
    pub regime_reset_ticks: u32,
    /// End-to-end latency budget for one decision cycle
    pub tick_budget_ms: u64,
    /// Batches older than last-processed minus this are dropped
    pub late_tolerance_secs: i64,
    /// Tick window for the realized-volatility circuit breaker
    pub vol_breaker_window: usize,
    /// Breaker trips when realized vol exceeds this multiple of its trailing average
    pub vol_breaker_ratio: f64,
    /// Limit price offset from market, by trade direction
    pub limit_price_offset: f64,
    /// Starting equity
    pub initial_capital: f64,
    /// Snapshot channel depth
    pub feed_capacity: usize,
    /// Optional per-regime signal weight overrides, keyed by regime name
    pub regime_weights: HashMap<String, HashMap<String, f64>>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            signal_threshold: 0.3,
            max_position_fraction: 0.20,
            max_total_exposure_fraction: 0.80,
            drawdown_reduced_threshold: 0.15,
            drawdown_halt_threshold: 0.25,
            regime_confidence_threshold: 0.70,
            feature_window: 10,
            return_window: 20,
            min_signal_count: 5,
            base_size_fraction: 0.10,
            regime_reset_ticks: 5,
            tick_budget_ms: 100,
            late_tolerance_secs: 5,
            vol_breaker_window: 10,
            vol_breaker_ratio: 3.0,
            limit_price_offset: 0.0005,
            initial_capital: 10_000.0,
            feed_capacity: 64,
            regime_weights: HashMap::new(),
        }
    }
}

impl CoreConfig {
    /// Load from an optional TOML file, then `CITYBOT_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("CITYBOT").separator("__"))
            .build()
            .context("failed to assemble configuration sources")?;

        let cfg: CoreConfig = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail fast on values the pipeline cannot operate with
    pub fn validate(&self) -> Result<()> {
        let unit_bounded = [
            ("confidence_threshold", self.confidence_threshold),
            ("signal_threshold", self.signal_threshold),
            ("regime_confidence_threshold", self.regime_confidence_threshold),
            ("drawdown_reduced_threshold", self.drawdown_reduced_threshold),
            ("drawdown_halt_threshold", self.drawdown_halt_threshold),
            ("max_position_fraction", self.max_position_fraction),
            (
                "max_total_exposure_fraction",
                self.max_total_exposure_fraction,
            ),
            ("base_size_fraction", self.base_size_fraction),
        ];
        for (name, value) in unit_bounded {
            if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                anyhow::bail!("{} must be in [0, 1], got {}", name, value);
            }
        }

        if self.drawdown_reduced_threshold >= self.drawdown_halt_threshold {
            anyhow::bail!(
                "drawdown_reduced_threshold ({}) must be below drawdown_halt_threshold ({})",
                self.drawdown_reduced_threshold,
                self.drawdown_halt_threshold
            );
        }
        if self.max_position_fraction > self.max_total_exposure_fraction {
            anyhow::bail!(
                "max_position_fraction ({}) exceeds max_total_exposure_fraction ({})",
                self.max_position_fraction,
                self.max_total_exposure_fraction
            );
        }
        if self.feature_window == 0 || self.return_window < 2 {
            anyhow::bail!("feature_window must be >= 1 and return_window >= 2");
        }
        if self.min_signal_count == 0 {
            anyhow::bail!("min_signal_count must be >= 1");
        }
        if self.vol_breaker_window < 2 {
            anyhow::bail!("vol_breaker_window must be >= 2");
        }
        if self.vol_breaker_ratio <= 1.0 {
            anyhow::bail!(
                "vol_breaker_ratio must exceed 1.0, got {}",
                self.vol_breaker_ratio
            );
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            anyhow::bail!("initial_capital must be positive");
        }
        if self.feed_capacity == 0 {
            anyhow::bail!("feed_capacity must be >= 1");
        }
        if !self.limit_price_offset.is_finite() || self.limit_price_offset < 0.0 {
            anyhow::bail!("limit_price_offset must be non-negative");
        }

        for (regime, weights) in &self.regime_weights {
            for (signal, weight) in weights {
                if !weight.is_finite() {
                    anyhow::bail!(
                        "regime_weights[{}][{}] is not finite",
                        regime,
                        signal
                    );
                }
            }
        }

        Ok(())
    }
}
