use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::models::{
    AbstainCause, CombinedSignal, FeatureBatch, FillReport, Outcome, OrderIntent, Reasoning,
    RiskMode, RiskRule,
};
use crate::monitoring::{MetricsCollector, MetricsSnapshot};
use crate::regime::{
    ParameterTable, RegimeAssessment, RegimeChangeEvent, RegimeDetector, StrategyParameters,
};
use crate::risk::{RiskGovernor, RiskSnapshot};
use crate::signals::{FeatureNormalizer, SignalCombiner, SignalGenerator};
use crate::strategy::{PositionSizer, Sizing};
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything one decision cycle produces
#[derive(Debug, Clone)]
pub struct TickResult {
    pub outcome: Outcome,
    pub regime_change: Option<RegimeChangeEvent>,
}

/// Intermediate state of a cycle's compute phase, held until the budget
/// check decides whether it may be committed.
struct Computed {
    vector: crate::models::FeatureVector,
    assessment: RegimeAssessment,
    params: Arc<StrategyParameters>,
    combined: CombinedSignal,
    snapshot: RiskSnapshot,
    sizing: Sizing,
    tick_return: f64,
}

/// The decision cycle: normalize, generate, classify, combine, size, govern,
/// emit. One call to [`tick`](Self::tick) per snapshot, exactly one
/// [`Outcome`] out.
///
/// The compute phase is read-only against all stateful components; commits
/// happen only after the latency budget check, so a timed-out or failed tick
/// leaves no partial state behind.
pub struct DecisionPipeline {
    config: CoreConfig,
    budget: Duration,
    normalizer: FeatureNormalizer,
    generator: SignalGenerator,
    combiner: SignalCombiner,
    detector: RegimeDetector,
    parameters: ParameterTable,
    sizer: PositionSizer,
    governor: RiskGovernor,
    metrics: MetricsCollector,
    last_price: Option<f64>,
}

impl DecisionPipeline {
    pub fn new(config: CoreConfig) -> Result<Self> {
        let parameters = ParameterTable::from_config(&config)?;
        Ok(Self {
            budget: Duration::from_millis(config.tick_budget_ms),
            normalizer: FeatureNormalizer::new(config.feature_window),
            generator: SignalGenerator::new(config.feature_window, config.min_signal_count),
            combiner: SignalCombiner::new(config.min_signal_count),
            detector: RegimeDetector::new(
                config.return_window,
                config.regime_confidence_threshold,
                config.regime_reset_ticks,
            ),
            sizer: PositionSizer::new(
                config.confidence_threshold,
                config.signal_threshold,
                config.base_size_fraction,
            ),
            governor: RiskGovernor::new(
                config.initial_capital,
                config.max_position_fraction,
                config.max_total_exposure_fraction,
                config.drawdown_reduced_threshold,
                config.drawdown_halt_threshold,
                config.vol_breaker_window,
                config.vol_breaker_ratio,
            ),
            metrics: MetricsCollector::new(config.initial_capital),
            parameters,
            last_price: None,
            config,
        })
    }

    /// Run one decision cycle over a snapshot at the given market price.
    /// Never panics and never returns an error: every failure mode becomes a
    /// reasoned abstention.
    pub fn tick(&mut self, batch: &FeatureBatch, price: f64) -> TickResult {
        let started = Instant::now();

        let computed = self.compute(batch, price);
        let result = match computed {
            Ok(computed) => {
                if started.elapsed() > self.budget {
                    warn!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        budget_ms = self.config.tick_budget_ms,
                        "tick exceeded latency budget, abstaining without commit"
                    );
                    TickResult {
                        outcome: Outcome::abstain(
                            AbstainCause::Timeout,
                            self.fallback_reasoning(),
                        ),
                        regime_change: None,
                    }
                } else {
                    self.commit(batch, price, computed)
                }
            }
            Err(err) => {
                let cause = match &err {
                    CoreError::InvalidInput(_) => AbstainCause::NoValidData,
                    CoreError::IncompleteFeatures { .. } => AbstainCause::IncompleteFeatures,
                    CoreError::InsufficientSignals { .. } => AbstainCause::InsufficientSignals,
                    CoreError::TimeoutExceeded { .. } => AbstainCause::Timeout,
                    CoreError::CoreFault(_) => AbstainCause::Fault,
                };
                if matches!(err, CoreError::CoreFault(_)) {
                    error!(%err, "internal fault during decision cycle");
                } else {
                    debug!(%err, "decision cycle abstained");
                }
                TickResult {
                    outcome: Outcome::abstain(cause, self.fallback_reasoning()),
                    regime_change: None,
                }
            }
        };

        self.metrics
            .record_tick(&result.outcome, self.governor.snapshot(&batch.instrument).equity);
        result
    }

    /// Read-only phase: no component state changes here.
    fn compute(&self, batch: &FeatureBatch, price: f64) -> Result<Computed> {
        if !price.is_finite() || price <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "market price {} is unusable",
                price
            )));
        }

        let vector = self.normalizer.normalize(batch)?;
        let tick_return = match self.last_price {
            Some(last) if last > 0.0 => (price - last) / last,
            _ => 0.0,
        };
        let assessment = self.detector.assess(tick_return);
        let params = self.parameters.get(assessment.regime);
        let signals = self.generator.generate(&vector)?;
        let combined = self.combiner.combine(
            &signals,
            &params.weights,
            assessment.regime,
            assessment.confidence,
            batch.timestamp,
        )?;
        let snapshot = self.governor.snapshot(&batch.instrument);
        let sizing = self.sizer.size(&combined, &params, &snapshot);

        Ok(Computed {
            vector,
            assessment,
            params,
            combined,
            snapshot,
            sizing,
            tick_return,
        })
    }

    /// Mutating phase: fold the computed tick into every stateful component
    /// and emit the final outcome.
    fn commit(&mut self, batch: &FeatureBatch, price: f64, computed: Computed) -> TickResult {
        let Computed {
            vector,
            assessment,
            params,
            combined,
            snapshot,
            sizing,
            tick_return,
        } = computed;

        let mut reasoning = Reasoning {
            combined_strength: combined.strength,
            confidence: combined.confidence,
            regime: assessment.regime,
            risk_mode: snapshot.mode,
            risk_rule: None,
            abstain_cause: None,
        };

        let outcome = match sizing {
            Sizing::Abstain(cause) => {
                info!(
                    cause = format!("{:?}", cause).as_str(),
                    strength = format!("{:.3}", combined.strength).as_str(),
                    confidence = format!("{:.3}", combined.confidence).as_str(),
                    regime = assessment.regime.as_str(),
                    "abstaining"
                );
                Outcome::abstain(cause, reasoning)
            }
            Sizing::Propose(proposed) => {
                let governed = self.governor.govern(&batch.instrument, proposed);
                reasoning.risk_rule = governed.rule;
                if governed.size.abs() < f64::EPSILON {
                    let cause = match governed.rule {
                        Some(RiskRule::DrawdownHalt) => AbstainCause::Halted,
                        _ => AbstainCause::RiskVeto,
                    };
                    info!(
                        proposed,
                        rule = format!("{:?}", governed.rule).as_str(),
                        "risk governor vetoed proposal"
                    );
                    Outcome::abstain(cause, reasoning)
                } else {
                    let direction = governed.size.signum();
                    let intent = OrderIntent {
                        id: Uuid::new_v4(),
                        instrument: batch.instrument.clone(),
                        size: governed.size,
                        limit_price: price * (1.0 + direction * self.config.limit_price_offset),
                        confidence: combined.confidence,
                        regime: assessment.regime,
                        reasoning,
                    };
                    info!(
                        instrument = %intent.instrument,
                        size = format!("{:.2}", intent.size).as_str(),
                        limit_price = format!("{:.4}", intent.limit_price).as_str(),
                        regime = intent.regime.as_str(),
                        "emitting order intent"
                    );
                    Outcome::Trade(intent)
                }
            }
        };

        let regime_change = if assessment.changed {
            Some(RegimeChangeEvent {
                timestamp: batch.timestamp,
                old: assessment.previous(),
                new: assessment.regime,
                confidence: assessment.confidence,
                parameters: params.as_ref().clone(),
            })
        } else {
            None
        };

        self.normalizer.commit(batch, &vector);
        self.generator.commit(&vector);
        self.detector.commit(&assessment);
        self.governor.record_return(tick_return);
        self.governor.reevaluate();
        self.last_price = Some(price);

        TickResult {
            outcome,
            regime_change,
        }
    }

    /// Reasoning for ticks that failed before a combined signal existed
    fn fallback_reasoning(&self) -> Reasoning {
        Reasoning {
            combined_strength: 0.0,
            confidence: 0.0,
            regime: self.detector.current(),
            risk_mode: self.governor.mode(),
            risk_rule: None,
            abstain_cause: None,
        }
    }

    /// Execution feedback from the outside world
    pub fn on_fill(&mut self, fill: &FillReport) {
        let pnl = self.governor.on_fill(fill);
        if pnl != 0.0 {
            self.metrics.record_pnl(self.detector.current(), pnl);
        }
    }

    /// Operator acknowledgment clearing a halted book
    pub fn reset_risk(&mut self) {
        self.governor.reset();
    }

    pub fn risk_mode(&self) -> RiskMode {
        self.governor.mode()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
