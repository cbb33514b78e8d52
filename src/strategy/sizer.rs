use crate::models::{AbstainCause, CombinedSignal, RiskMode};
use crate::regime::StrategyParameters;
use crate::risk::RiskSnapshot;
use tracing::debug;

/// Sizing verdict for one tick: a signed notional proposal, or a reasoned
/// refusal before risk checks even run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    Propose(f64),
    Abstain(AbstainCause),
}

/// Turns a combined signal into a signed notional proposal.
///
/// Gates run in a fixed order: confidence first, then signal strength against
/// the stricter of the global and regime thresholds. Size is multiplicative:
/// base fraction, strength, confidence, the regime's position multiplier and
/// the drawdown multiplier, applied to current equity.
pub struct PositionSizer {
    confidence_threshold: f64,
    signal_threshold: f64,
    base_size_fraction: f64,
}

impl PositionSizer {
    pub fn new(confidence_threshold: f64, signal_threshold: f64, base_size_fraction: f64) -> Self {
        Self {
            confidence_threshold,
            signal_threshold,
            base_size_fraction,
        }
    }

    pub fn size(
        &self,
        signal: &CombinedSignal,
        params: &StrategyParameters,
        risk: &RiskSnapshot,
    ) -> Sizing {
        if signal.confidence < self.confidence_threshold {
            debug!(
                confidence = signal.confidence,
                threshold = self.confidence_threshold,
                "abstaining on low confidence"
            );
            return Sizing::Abstain(AbstainCause::LowConfidence);
        }

        let effective_threshold = self.signal_threshold.max(params.signal_threshold);
        if signal.strength.abs() < effective_threshold {
            debug!(
                strength = signal.strength,
                threshold = effective_threshold,
                "abstaining on weak signal"
            );
            return Sizing::Abstain(AbstainCause::WeakSignal);
        }

        let drawdown_multiplier = match risk.mode {
            RiskMode::Normal => 1.0,
            RiskMode::Reduced => 0.5,
            RiskMode::Halted => 0.0,
        };

        if risk.mode == RiskMode::Halted {
            // A halted book may still shed risk: propose only when the signal
            // points against the current position, capped at its magnitude
            let opposes =
                risk.position != 0.0 && signal.strength.signum() != risk.position.signum();
            if !opposes {
                return Sizing::Abstain(AbstainCause::Halted);
            }
            let magnitude = (self.base_size_fraction
                * signal.strength.abs()
                * signal.confidence
                * params.position_multiplier
                * risk.equity)
                .min(risk.position.abs());
            return Sizing::Propose(-risk.position.signum() * magnitude);
        }

        let magnitude = self.base_size_fraction
            * signal.strength.abs()
            * signal.confidence
            * params.position_multiplier
            * drawdown_multiplier
            * risk.equity;
        Sizing::Propose(signal.strength.signum() * magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::models::Regime;
    use crate::regime::ParameterTable;
    use chrono::Utc;
    use std::collections::HashMap;

    fn signal(strength: f64, confidence: f64) -> CombinedSignal {
        CombinedSignal {
            timestamp: Utc::now(),
            strength,
            confidence,
            components: HashMap::new(),
            regime: Regime::Trending,
        }
    }

    fn snapshot(mode: RiskMode, position: f64) -> RiskSnapshot {
        RiskSnapshot {
            mode,
            equity: 10_000.0,
            high_water_mark: 10_000.0,
            drawdown_pct: 0.0,
            max_drawdown_pct: 0.0,
            position,
            total_exposure: position.abs(),
            realized_pnl: 0.0,
        }
    }

    fn trending() -> StrategyParameters {
        ParameterTable::from_config(&CoreConfig::default())
            .unwrap()
            .get(Regime::Trending)
            .as_ref()
            .clone()
    }

    fn sizer() -> PositionSizer {
        PositionSizer::new(0.5, 0.3, 0.10)
    }

    #[test]
    fn test_confidence_gate_fires_before_strength_gate() {
        // Strong signal, weak confidence: the cause must be confidence
        let out = sizer().size(
            &signal(0.9, 0.4),
            &trending(),
            &snapshot(RiskMode::Normal, 0.0),
        );
        assert_eq!(out, Sizing::Abstain(AbstainCause::LowConfidence));
    }

    #[test]
    fn test_weak_signal_abstains() {
        let out = sizer().size(
            &signal(0.2, 0.9),
            &trending(),
            &snapshot(RiskMode::Normal, 0.0),
        );
        assert_eq!(out, Sizing::Abstain(AbstainCause::WeakSignal));
    }

    #[test]
    fn test_multiplicative_sizing_with_sign() {
        let out = sizer().size(
            &signal(-0.8, 0.75),
            &trending(),
            &snapshot(RiskMode::Normal, 0.0),
        );
        // 0.10 * 0.8 * 0.75 * 1.0 * 1.0 * 10_000 = 600, short
        match out {
            Sizing::Propose(size) => assert!((size + 600.0).abs() < 1e-9),
            other => panic!("expected proposal, got {:?}", other),
        }
    }

    #[test]
    fn test_reduced_mode_halves_size() {
        let out = sizer().size(
            &signal(0.8, 0.75),
            &trending(),
            &snapshot(RiskMode::Reduced, 0.0),
        );
        match out {
            Sizing::Propose(size) => assert!((size - 300.0).abs() < 1e-9),
            other => panic!("expected proposal, got {:?}", other),
        }
    }

    #[test]
    fn test_halted_flat_book_abstains() {
        let out = sizer().size(
            &signal(0.8, 0.75),
            &trending(),
            &snapshot(RiskMode::Halted, 0.0),
        );
        assert_eq!(out, Sizing::Abstain(AbstainCause::Halted));
    }

    #[test]
    fn test_halted_aligned_signal_abstains() {
        // Long book, bullish signal: would add risk
        let out = sizer().size(
            &signal(0.8, 0.75),
            &trending(),
            &snapshot(RiskMode::Halted, 1_000.0),
        );
        assert_eq!(out, Sizing::Abstain(AbstainCause::Halted));
    }

    #[test]
    fn test_halted_opposing_signal_proposes_capped_reduction() {
        // Small long book, bearish signal: reduce, never flip
        let out = sizer().size(
            &signal(-0.9, 0.9),
            &trending(),
            &snapshot(RiskMode::Halted, 100.0),
        );
        match out {
            Sizing::Propose(size) => {
                assert!(size < 0.0);
                assert!(size.abs() <= 100.0 + 1e-9);
            }
            other => panic!("expected proposal, got {:?}", other),
        }
    }
}
