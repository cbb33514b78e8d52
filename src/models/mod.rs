use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Market regime classification
///
/// Closed variant set with an explicit `Uncertain` member so downstream
/// matching is exhaustive and there is no "unknown regime" runtime branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Trending,
    MeanReverting,
    HighVolatility,
    LowVolatility,
    Uncertain,
}

impl Regime {
    pub const ALL: [Regime; 5] = [
        Regime::Trending,
        Regime::MeanReverting,
        Regime::HighVolatility,
        Regime::LowVolatility,
        Regime::Uncertain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Trending => "trending",
            Regime::MeanReverting => "mean-reverting",
            Regime::HighVolatility => "high-volatility",
            Regime::LowVolatility => "low-volatility",
            Regime::Uncertain => "uncertain",
        }
    }

    /// Index into fixed-size per-regime tables
    pub fn index(&self) -> usize {
        match self {
            Regime::Trending => 0,
            Regime::MeanReverting => 1,
            Regime::HighVolatility => 2,
            Regime::LowVolatility => 3,
            Regime::Uncertain => 4,
        }
    }
}

/// Portfolio risk operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskMode {
    Normal,
    Reduced,
    Halted,
}

impl RiskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskMode::Normal => "normal",
            RiskMode::Reduced => "reduced",
            RiskMode::Halted => "halted",
        }
    }
}

/// Raw observation batch handed off by the ingestion collaborators
///
/// Arrival order is not guaranteed; the intake buffer reorders by timestamp
/// before the decision cycle sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBatch {
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    pub observations: HashMap<String, f64>,
}

/// One normalized observation batch at time T
///
/// All values are finite and scaled to [0, 1]. `stale` is set when the batch
/// that produced this tick was rejected and the previous valid vector was
/// reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    pub values: HashMap<String, f64>,
    pub stale: bool,
}

/// Strength score for one feature, clamped to [-1, 1] on construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSignal {
    pub source: String,
    pub strength: f64,
}

impl FeatureSignal {
    pub fn new(source: impl Into<String>, strength: f64) -> Self {
        Self {
            source: source.into(),
            strength: strength.clamp(-1.0, 1.0),
        }
    }
}

/// Weighted aggregate of per-feature signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedSignal {
    pub timestamp: DateTime<Utc>,
    pub strength: f64,
    pub confidence: f64,
    pub components: HashMap<String, f64>,
    pub regime: Regime,
}

/// Risk Governor rule that altered or vetoed a proposed size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskRule {
    PerInstrumentCap,
    TotalExposureCap,
    DrawdownHalt,
    CircuitBreaker,
}

/// Why a tick produced no order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbstainCause {
    WeakSignal,
    LowConfidence,
    IncompleteFeatures,
    InsufficientSignals,
    Timeout,
    Halted,
    RiskVeto,
    Fault,
    NoValidData,
}

/// Structured reasoning record attached to every outcome
///
/// Captures the combined signal value, regime, confidence and which Risk
/// Governor rule (if any) altered the size. Required for auditability; free
/// text is deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reasoning {
    pub combined_strength: f64,
    pub confidence: f64,
    pub regime: Regime,
    pub risk_mode: RiskMode,
    pub risk_rule: Option<RiskRule>,
    pub abstain_cause: Option<AbstainCause>,
}

/// Final trade decision for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: Uuid,
    pub instrument: String,
    pub size: f64,
    pub limit_price: f64,
    pub confidence: f64,
    pub regime: Regime,
    pub reasoning: Reasoning,
}

/// Terminal outcome of one decision cycle: a trade or a reasoned no-trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome {
    Trade(OrderIntent),
    Abstain { reasoning: Reasoning },
}

impl Outcome {
    pub fn abstain(cause: AbstainCause, mut reasoning: Reasoning) -> Self {
        reasoning.abstain_cause = Some(cause);
        Outcome::Abstain { reasoning }
    }

    pub fn is_abstain(&self) -> bool {
        matches!(self, Outcome::Abstain { .. })
    }

    pub fn reasoning(&self) -> &Reasoning {
        match self {
            Outcome::Trade(intent) => &intent.reasoning,
            Outcome::Abstain { reasoning } => reasoning,
        }
    }
}

/// Fill reported by the external execution collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub instrument: String,
    pub filled_size: f64,
    pub fill_price: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_signal_clamps_on_write() {
        let s = FeatureSignal::new("temp_momentum", 3.5);
        assert_eq!(s.strength, 1.0);

        let s = FeatureSignal::new("precipitation", -7.0);
        assert_eq!(s.strength, -1.0);

        let s = FeatureSignal::new("aqi_delta", 0.42);
        assert_eq!(s.strength, 0.42);
    }

    #[test]
    fn test_regime_index_covers_all() {
        let mut seen = [false; 5];
        for regime in Regime::ALL {
            seen[regime.index()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_abstain_carries_cause() {
        let reasoning = Reasoning {
            combined_strength: 0.1,
            confidence: 0.2,
            regime: Regime::Uncertain,
            risk_mode: RiskMode::Normal,
            risk_rule: None,
            abstain_cause: None,
        };

        let outcome = Outcome::abstain(AbstainCause::LowConfidence, reasoning);
        assert!(outcome.is_abstain());
        assert_eq!(
            outcome.reasoning().abstain_cause,
            Some(AbstainCause::LowConfidence)
        );
    }
}
