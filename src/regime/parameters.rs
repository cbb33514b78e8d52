use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::models::Regime;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Immutable per-regime strategy parameters.
///
/// One instance per regime, swapped atomically on regime change. `version`
/// increments when configuration overrides replace a default entry, so logs
/// and events can name the exact table a decision used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParameters {
    pub regime: Regime,
    pub weights: HashMap<String, f64>,
    pub position_multiplier: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub signal_threshold: f64,
    pub version: u32,
}

fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn default_for(regime: Regime) -> StrategyParameters {
    match regime {
        Regime::Trending => StrategyParameters {
            regime,
            weights: weights(&[
                ("temperature_momentum", 0.5),
                ("temperature_trend", 0.6),
                ("active_flights_trend", 0.7),
                ("active_flights_momentum", 0.6),
                ("precipitation", -0.3),
                ("avg_delay", -0.2),
            ]),
            position_multiplier: 1.0,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.05,
            signal_threshold: 0.3,
            version: 1,
        },
        Regime::MeanReverting => StrategyParameters {
            regime,
            weights: weights(&[
                // Fade momentum in a reverting market
                ("temperature_momentum", -0.4),
                ("pressure_momentum", 0.5),
                ("aqi_momentum", 0.4),
                ("precipitation", 0.4),
                ("active_flights_momentum", -0.3),
            ]),
            position_multiplier: 0.8,
            stop_loss_pct: 0.015,
            take_profit_pct: 0.03,
            signal_threshold: 0.4,
            version: 1,
        },
        Regime::HighVolatility => StrategyParameters {
            regime,
            // Trust slow, observable indicators when the market whips
            weights: weights(&[
                ("precipitation", 0.6),
                ("avg_delay", 0.5),
                ("wind_speed", -0.4),
                ("aqi_momentum", 0.3),
            ]),
            position_multiplier: 0.5,
            stop_loss_pct: 0.04,
            take_profit_pct: 0.08,
            signal_threshold: 0.5,
            version: 1,
        },
        Regime::LowVolatility => StrategyParameters {
            regime,
            weights: weights(&[
                ("temperature_momentum", 0.4),
                ("active_flights_momentum", 0.5),
                ("temperature_trend", 0.4),
                ("active_flights_trend", 0.5),
                ("pressure_momentum", -0.3),
                ("aqi_momentum", -0.3),
            ]),
            position_multiplier: 1.0,
            stop_loss_pct: 0.01,
            take_profit_pct: 0.025,
            signal_threshold: 0.25,
            version: 1,
        },
        Regime::Uncertain => StrategyParameters {
            regime,
            weights: weights(&[
                ("precipitation", 0.5),
                ("active_flights", 0.4),
                ("active_flights_momentum", 0.4),
            ]),
            position_multiplier: 0.3,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            signal_threshold: 0.6,
            version: 1,
        },
    }
}

/// Fixed-size table of strategy parameters indexed by regime.
///
/// Built once at startup, validated, then read-only. Lookups cannot miss:
/// every regime has an entry by construction.
pub struct ParameterTable {
    entries: [Arc<StrategyParameters>; 5],
}

impl ParameterTable {
    /// Build the default table with optional weight overrides from
    /// configuration. Fails fast on an invalid entry.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let mut entries = Vec::with_capacity(Regime::ALL.len());
        for regime in Regime::ALL {
            let mut params = default_for(regime);
            if let Some(overrides) = config.regime_weights.get(regime.as_str()) {
                for (name, weight) in overrides {
                    params.weights.insert(name.clone(), *weight);
                }
                params.version += 1;
                info!(
                    regime = regime.as_str(),
                    count = overrides.len(),
                    version = params.version,
                    "applied weight overrides"
                );
            }
            validate(&params)?;
            entries.push(Arc::new(params));
        }
        let entries: [Arc<StrategyParameters>; 5] = entries
            .try_into()
            .map_err(|_| CoreError::CoreFault("parameter table size mismatch".to_string()))?;
        Ok(Self { entries })
    }

    pub fn get(&self, regime: Regime) -> Arc<StrategyParameters> {
        Arc::clone(&self.entries[regime.index()])
    }
}

fn validate(params: &StrategyParameters) -> Result<()> {
    let p = params.position_multiplier;
    if !p.is_finite() || p <= 0.0 || p > 1.0 {
        return Err(CoreError::InvalidInput(format!(
            "position_multiplier for {} must be in (0, 1], got {}",
            params.regime.as_str(),
            p
        )));
    }
    if !(0.0..=1.0).contains(&params.signal_threshold) {
        return Err(CoreError::InvalidInput(format!(
            "signal_threshold for {} must be in [0, 1]",
            params.regime.as_str()
        )));
    }
    for pct in [params.stop_loss_pct, params.take_profit_pct] {
        if !pct.is_finite() || pct <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "stop/take widths for {} must be positive",
                params.regime.as_str()
            )));
        }
    }
    if params.weights.is_empty() {
        return Err(CoreError::InvalidInput(format!(
            "empty weight table for {}",
            params.regime.as_str()
        )));
    }
    for (name, w) in &params.weights {
        if !w.is_finite() {
            return Err(CoreError::InvalidInput(format!(
                "non-finite weight '{}' for {}",
                name,
                params.regime.as_str()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_regime() {
        let table = ParameterTable::from_config(&CoreConfig::default()).unwrap();
        for regime in Regime::ALL {
            let params = table.get(regime);
            assert_eq!(params.regime, regime);
            assert!(params.position_multiplier > 0.0 && params.position_multiplier <= 1.0);
            assert_eq!(params.version, 1);
        }
    }

    #[test]
    fn test_uncertain_is_most_conservative() {
        let table = ParameterTable::from_config(&CoreConfig::default()).unwrap();
        let uncertain = table.get(Regime::Uncertain);
        for regime in Regime::ALL {
            if regime != Regime::Uncertain {
                assert!(uncertain.position_multiplier <= table.get(regime).position_multiplier);
                assert!(uncertain.signal_threshold >= table.get(regime).signal_threshold);
            }
        }
    }

    #[test]
    fn test_override_bumps_version() {
        let mut config = CoreConfig::default();
        config
            .regime_weights
            .entry("trending".to_string())
            .or_default()
            .insert("precipitation".to_string(), -0.5);

        let table = ParameterTable::from_config(&config).unwrap();
        let trending = table.get(Regime::Trending);
        assert_eq!(trending.weights["precipitation"], -0.5);
        assert_eq!(trending.version, 2);
        assert_eq!(table.get(Regime::Uncertain).version, 1);
    }

    #[test]
    fn test_rejects_nonfinite_override() {
        let mut config = CoreConfig::default();
        config
            .regime_weights
            .entry("uncertain".to_string())
            .or_default()
            .insert("precipitation".to_string(), f64::INFINITY);
        assert!(ParameterTable::from_config(&config).is_err());
    }
}
