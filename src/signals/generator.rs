use crate::error::CoreError;
use crate::models::{FeatureSignal, FeatureVector};
use crate::Result;
use std::collections::VecDeque;
use tracing::debug;

/// Polarity weights for level signals: positive means the feature rising
/// suggests the instrument rising.
const LEVEL_WEIGHTS: &[(&str, f64)] = &[
    ("precipitation", -0.4),
    ("wind_speed", -0.2),
    ("avg_delay", -0.3),
    ("aqi", -0.3),
    ("active_flights", 0.4),
];

/// Base features that get a `<name>_momentum` derivative (tick-over-tick delta)
const MOMENTUM_WEIGHTS: &[(&str, f64)] = &[
    ("temperature", 0.3),
    ("pressure", -0.2),
    ("aqi", -0.3),
    ("pm2_5", -0.3),
    ("active_flights", 0.5),
];

/// Base features that get a `<name>_trend` derivative (last vs window mean)
const TREND_WEIGHTS: &[(&str, f64)] = &[("temperature", 0.2), ("active_flights", 0.5)];

/// Sensitivity of the tanh saturation on derivative signals. Normalized
/// deltas are small, so they get stretched before saturating.
const SATURATION_GAIN: f64 = 4.0;

/// Turns normalized feature vectors into per-feature strength scores.
///
/// Level signals center the [0,1] value around the 0.5 neutral point; momentum
/// and trend signals come from a bounded history of past vectors, saturated
/// through `tanh` so one violent delta cannot dominate. Every strength is
/// clamped to [-1, 1] on construction.
pub struct SignalGenerator {
    history_size: usize,
    min_signal_count: usize,
    history: VecDeque<FeatureVector>,
}

impl SignalGenerator {
    pub fn new(history_size: usize, min_signal_count: usize) -> Self {
        Self {
            history_size,
            min_signal_count,
            history: VecDeque::with_capacity(history_size),
        }
    }

    /// Produce signals for the current vector without touching history.
    ///
    /// Returns `IncompleteFeatures` when fewer than the configured minimum
    /// number of signals could be produced.
    pub fn generate(&self, vector: &FeatureVector) -> Result<Vec<FeatureSignal>> {
        let mut signals = Vec::new();

        for &(name, weight) in LEVEL_WEIGHTS {
            if let Some(&value) = vector.values.get(name) {
                let centered = (value - 0.5) * 2.0;
                signals.push(FeatureSignal::new(name, centered * weight));
            }
        }

        if let Some(prev) = self.history.back() {
            for &(name, weight) in MOMENTUM_WEIGHTS {
                if let (Some(&curr), Some(&before)) =
                    (vector.values.get(name), prev.values.get(name))
                {
                    let delta = (curr - before) * SATURATION_GAIN;
                    signals.push(FeatureSignal::new(
                        format!("{}_momentum", name),
                        delta.tanh() * weight,
                    ));
                }
            }
        }

        if self.history.len() >= 2 {
            for &(name, weight) in TREND_WEIGHTS {
                if let Some(&curr) = vector.values.get(name) {
                    let past: Vec<f64> = self
                        .history
                        .iter()
                        .filter_map(|v| v.values.get(name).copied())
                        .collect();
                    if past.len() >= 2 {
                        let mean = past.iter().sum::<f64>() / past.len() as f64;
                        let drift = (curr - mean) * SATURATION_GAIN;
                        signals.push(FeatureSignal::new(
                            format!("{}_trend", name),
                            drift.tanh() * weight,
                        ));
                    }
                }
            }
        }

        if signals.len() < self.min_signal_count {
            return Err(CoreError::IncompleteFeatures {
                got: signals.len(),
                need: self.min_signal_count,
            });
        }

        debug!(count = signals.len(), "generated feature signals");
        Ok(signals)
    }

    /// Fold the vector into history. Call only after the tick passed its
    /// budget check.
    pub fn commit(&mut self, vector: &FeatureVector) {
        if self.history.len() == self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(vector.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn vector(pairs: &[(&str, f64)]) -> FeatureVector {
        FeatureVector {
            timestamp: Utc::now(),
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
            stale: false,
        }
    }

    fn full_vector(level: f64) -> FeatureVector {
        vector(&[
            ("precipitation", level),
            ("wind_speed", level),
            ("avg_delay", level),
            ("aqi", level),
            ("active_flights", level),
            ("temperature", level),
            ("pressure", level),
            ("pm2_5", level),
        ])
    }

    #[test]
    fn test_level_signal_polarity() {
        let gen = SignalGenerator::new(10, 1);
        let signals = gen.generate(&full_vector(1.0)).unwrap();
        let by_name: HashMap<_, _> = signals
            .iter()
            .map(|s| (s.source.as_str(), s.strength))
            .collect();
        // High precipitation is bearish, high flight volume bullish
        assert!(by_name["precipitation"] < 0.0);
        assert!(by_name["active_flights"] > 0.0);
    }

    #[test]
    fn test_all_strengths_bounded() {
        let mut gen = SignalGenerator::new(10, 1);
        for level in [0.0, 1.0, 0.0, 1.0] {
            let v = full_vector(level);
            let signals = gen.generate(&v).unwrap();
            for s in &signals {
                assert!(s.strength >= -1.0 && s.strength <= 1.0, "{:?}", s);
            }
            gen.commit(&v);
        }
    }

    #[test]
    fn test_momentum_appears_after_one_commit() {
        let mut gen = SignalGenerator::new(10, 1);
        let first = full_vector(0.2);
        gen.commit(&first);

        let signals = gen.generate(&full_vector(0.8)).unwrap();
        let momentum = signals
            .iter()
            .find(|s| s.source == "temperature_momentum")
            .unwrap();
        // Temperature rose and carries positive polarity
        assert!(momentum.strength > 0.0);
    }

    #[test]
    fn test_incomplete_features_below_minimum() {
        let gen = SignalGenerator::new(10, 5);
        let err = gen
            .generate(&vector(&[("precipitation", 0.5)]))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::IncompleteFeatures { got: 1, need: 5 }
        ));
    }

    #[test]
    fn test_generate_is_pure_without_commit() {
        let gen = SignalGenerator::new(10, 1);
        let v = full_vector(0.9);
        let a = gen.generate(&v).unwrap();
        let b = gen.generate(&v).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.strength, y.strength);
        }
    }
}
