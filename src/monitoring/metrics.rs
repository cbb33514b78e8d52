use crate::models::{Outcome, Regime, RiskMode};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Equity samples retained for sharpe/drawdown computation
const EQUITY_HISTORY: usize = 10_000;

const TICKS_PER_YEAR: f64 = 252.0;

/// Per-regime performance breakdown
#[derive(Debug, Clone, Serialize)]
pub struct RegimeStats {
    pub regime: Regime,
    pub trades: u32,
    pub pnl: f64,
}

/// Point-in-time view of core performance, reflecting the latest completed
/// tick. Pull-based: built on demand, never pushed.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tick_count: u64,
    pub trade_count: u64,
    pub abstain_count: u64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub current_regime: Regime,
    pub current_mode: RiskMode,
    pub regime_breakdown: Vec<RegimeStats>,
}

/// Accumulates decision and performance counters across ticks.
pub struct MetricsCollector {
    tick_count: u64,
    trade_count: u64,
    abstain_count: u64,
    wins: u32,
    losses: u32,
    realized_pnl: f64,
    equity_curve: VecDeque<f64>,
    regime_trades: HashMap<Regime, u32>,
    regime_pnl: HashMap<Regime, f64>,
    current_regime: Regime,
    current_mode: RiskMode,
}

impl MetricsCollector {
    pub fn new(initial_equity: f64) -> Self {
        let mut equity_curve = VecDeque::with_capacity(EQUITY_HISTORY);
        equity_curve.push_back(initial_equity);
        Self {
            tick_count: 0,
            trade_count: 0,
            abstain_count: 0,
            wins: 0,
            losses: 0,
            realized_pnl: 0.0,
            equity_curve,
            regime_trades: HashMap::new(),
            regime_pnl: HashMap::new(),
            current_regime: Regime::Uncertain,
            current_mode: RiskMode::Normal,
        }
    }

    pub fn record_tick(&mut self, outcome: &Outcome, equity: f64) {
        self.tick_count += 1;
        let reasoning = outcome.reasoning();
        self.current_regime = reasoning.regime;
        self.current_mode = reasoning.risk_mode;
        match outcome {
            Outcome::Trade(intent) => {
                self.trade_count += 1;
                *self.regime_trades.entry(intent.regime).or_insert(0) += 1;
            }
            Outcome::Abstain { .. } => self.abstain_count += 1,
        }
        if self.equity_curve.len() == EQUITY_HISTORY {
            self.equity_curve.pop_front();
        }
        self.equity_curve.push_back(equity);
    }

    /// Attribute a realized PnL event to the regime that produced the trade
    pub fn record_pnl(&mut self, regime: Regime, pnl: f64) {
        self.realized_pnl += pnl;
        *self.regime_pnl.entry(regime).or_insert(0.0) += pnl;
        if pnl > 0.0 {
            self.wins += 1;
        } else if pnl < 0.0 {
            self.losses += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let closed = self.wins + self.losses;
        let win_rate = if closed > 0 {
            self.wins as f64 / closed as f64
        } else {
            0.0
        };
        let regime_breakdown = Regime::ALL
            .iter()
            .filter_map(|&regime| {
                let trades = self.regime_trades.get(&regime).copied().unwrap_or(0);
                let pnl = self.regime_pnl.get(&regime).copied().unwrap_or(0.0);
                if trades == 0 && pnl == 0.0 {
                    None
                } else {
                    Some(RegimeStats {
                        regime,
                        trades,
                        pnl,
                    })
                }
            })
            .collect();

        MetricsSnapshot {
            tick_count: self.tick_count,
            trade_count: self.trade_count,
            abstain_count: self.abstain_count,
            sharpe: self.sharpe(),
            max_drawdown: self.max_drawdown(),
            win_rate,
            realized_pnl: self.realized_pnl,
            current_regime: self.current_regime,
            current_mode: self.current_mode,
            regime_breakdown,
        }
    }

    /// Annualized sharpe over the retained equity curve, zero risk-free rate
    fn sharpe(&self) -> f64 {
        if self.equity_curve.len() < 3 {
            return 0.0;
        }
        let returns: Vec<f64> = self
            .equity_curve
            .iter()
            .zip(self.equity_curve.iter().skip(1))
            .filter(|(prev, _)| **prev != 0.0)
            .map(|(prev, curr)| (curr - prev) / prev)
            .collect();
        if returns.is_empty() {
            return 0.0;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        if std == 0.0 {
            return 0.0;
        }
        mean / std * TICKS_PER_YEAR.sqrt()
    }

    /// Largest peak-to-trough decline over the retained equity curve
    fn max_drawdown(&self) -> f64 {
        let mut peak = f64::NEG_INFINITY;
        let mut worst = 0.0f64;
        for &equity in &self.equity_curve {
            peak = peak.max(equity);
            if peak > 0.0 {
                worst = worst.max((peak - equity) / peak);
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AbstainCause, Reasoning};

    fn abstain() -> Outcome {
        Outcome::abstain(
            AbstainCause::WeakSignal,
            Reasoning {
                combined_strength: 0.1,
                confidence: 0.6,
                regime: Regime::Trending,
                risk_mode: RiskMode::Normal,
                risk_rule: None,
                abstain_cause: None,
            },
        )
    }

    #[test]
    fn test_counts_outcomes() {
        let mut metrics = MetricsCollector::new(10_000.0);
        metrics.record_tick(&abstain(), 10_000.0);
        metrics.record_tick(&abstain(), 10_000.0);
        let snap = metrics.snapshot();
        assert_eq!(snap.tick_count, 2);
        assert_eq!(snap.abstain_count, 2);
        assert_eq!(snap.trade_count, 0);
    }

    #[test]
    fn test_max_drawdown_from_equity_curve() {
        let mut metrics = MetricsCollector::new(10_000.0);
        for equity in [11_000.0, 9_900.0, 10_500.0] {
            metrics.record_tick(&abstain(), equity);
        }
        let snap = metrics.snapshot();
        assert!((snap.max_drawdown - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_win_rate_and_regime_attribution() {
        let mut metrics = MetricsCollector::new(10_000.0);
        metrics.record_pnl(Regime::Trending, 100.0);
        metrics.record_pnl(Regime::Trending, -40.0);
        metrics.record_pnl(Regime::MeanReverting, 80.0);
        let snap = metrics.snapshot();
        assert!((snap.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((snap.realized_pnl - 140.0).abs() < 1e-9);

        let trending = snap
            .regime_breakdown
            .iter()
            .find(|s| s.regime == Regime::Trending)
            .unwrap();
        assert!((trending.pnl - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_rising_equity_has_positive_sharpe() {
        let mut metrics = MetricsCollector::new(10_000.0);
        for i in 1..=20 {
            metrics.record_tick(&abstain(), 10_000.0 + (i * i) as f64);
        }
        assert!(metrics.snapshot().sharpe > 0.0);
    }
}
