use crate::error::CoreError;
use crate::models::{CombinedSignal, FeatureSignal, Regime};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Weight applied to signals the active regime's table does not mention
const DEFAULT_WEIGHT: f64 = 0.1;

/// Weighted aggregation of per-feature signals into one decision input.
///
/// Stateless; the per-regime weight table arrives from the parameter provider
/// each tick so a regime swap takes effect immediately.
pub struct SignalCombiner {
    min_signal_count: usize,
}

impl SignalCombiner {
    pub fn new(min_signal_count: usize) -> Self {
        Self { min_signal_count }
    }

    /// Combine signals under the given regime weights.
    ///
    /// Strength is the weight-normalized sum clamped to [-1, 1]. Confidence is
    /// the directional agreement of the components with the combined sign,
    /// scaled by the detector's regime confidence.
    pub fn combine(
        &self,
        signals: &[FeatureSignal],
        weights: &HashMap<String, f64>,
        regime: Regime,
        regime_confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<CombinedSignal> {
        if signals.len() < self.min_signal_count {
            return Err(CoreError::InsufficientSignals {
                got: signals.len(),
                need: self.min_signal_count,
            });
        }

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        let mut components = HashMap::with_capacity(signals.len());

        for signal in signals {
            let weight = weights
                .get(&signal.source)
                .copied()
                .unwrap_or(DEFAULT_WEIGHT);
            weighted_sum += signal.strength * weight;
            total_weight += weight.abs();
            components.insert(signal.source.clone(), signal.strength);
        }

        let strength = if total_weight > 0.0 {
            (weighted_sum / total_weight).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let confidence =
            (self.agreement_factor(signals, strength) * regime_confidence).clamp(0.0, 1.0);

        if !strength.is_finite() || !confidence.is_finite() {
            return Err(CoreError::CoreFault(format!(
                "non-finite combined signal: strength={}, confidence={}",
                strength, confidence
            )));
        }

        debug!(
            strength = format!("{:.3}", strength).as_str(),
            confidence = format!("{:.3}", confidence).as_str(),
            regime = regime.as_str(),
            "combined signals"
        );

        Ok(CombinedSignal {
            timestamp,
            strength,
            confidence,
            components,
            regime,
        })
    }

    /// Directional agreement of components with the combined sign, in [0, 1].
    /// Components pointing with the result add their magnitude, components
    /// pointing against subtract it.
    fn agreement_factor(&self, signals: &[FeatureSignal], strength: f64) -> f64 {
        if signals.is_empty() || strength == 0.0 {
            return 0.5;
        }
        let sum: f64 = signals
            .iter()
            .map(|s| {
                if s.strength.signum() == strength.signum() {
                    s.strength.abs()
                } else {
                    -s.strength.abs()
                }
            })
            .sum();
        let avg = sum / signals.len() as f64;
        ((avg + 1.0) / 2.0).clamp(0.0, 1.0)
    }
}
