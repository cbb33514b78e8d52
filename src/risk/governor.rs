use crate::models::{FillReport, RiskMode, RiskRule};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

/// Extra cut applied while the volatility circuit breaker is tripped
const BREAKER_CUT: f64 = 0.75;
/// Trailing volatility samples kept for the breaker baseline
const VOL_SAMPLE_HISTORY: usize = 50;
/// Baseline samples required before the breaker can trip
const VOL_SAMPLE_MIN: usize = 5;

/// Read-only view of risk state, taken once at tick start so every stage of
/// a cycle sees the same numbers.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub mode: RiskMode,
    pub equity: f64,
    pub high_water_mark: f64,
    pub drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    /// Signed notional held in the instrument being sized
    pub position: f64,
    pub total_exposure: f64,
    pub realized_pnl: f64,
}

/// A proposal after the governor's rules, with the rule that altered it
#[derive(Debug, Clone, Copy)]
pub struct Governed {
    pub size: f64,
    pub rule: Option<RiskRule>,
}

#[derive(Debug, Clone, Copy)]
struct Position {
    notional: f64,
    avg_price: f64,
}

/// Sole owner of portfolio risk state.
///
/// Applies hard limits in a fixed order: per-instrument cap, total exposure
/// cap, the drawdown state machine, then the volatility circuit breaker.
/// Scaling stops at the boundary; a scale that would flip the trade's sign
/// becomes a veto. The drawdown mode never moves backward within a loss
/// episode: Reduced clears only on a new high-water mark and Halted only via
/// an explicit [`reset`](Self::reset).
pub struct RiskGovernor {
    max_position_fraction: f64,
    max_total_exposure_fraction: f64,
    reduced_threshold: f64,
    halt_threshold: f64,
    vol_breaker_window: usize,
    vol_breaker_ratio: f64,

    equity: f64,
    high_water_mark: f64,
    drawdown_pct: f64,
    max_drawdown_pct: f64,
    mode: RiskMode,
    realized_pnl: f64,
    positions: HashMap<String, Position>,

    tick_returns: VecDeque<f64>,
    vol_samples: VecDeque<f64>,
}

impl RiskGovernor {
    pub fn new(
        initial_capital: f64,
        max_position_fraction: f64,
        max_total_exposure_fraction: f64,
        reduced_threshold: f64,
        halt_threshold: f64,
        vol_breaker_window: usize,
        vol_breaker_ratio: f64,
    ) -> Self {
        Self {
            max_position_fraction,
            max_total_exposure_fraction,
            reduced_threshold,
            halt_threshold,
            vol_breaker_window,
            vol_breaker_ratio,
            equity: initial_capital,
            high_water_mark: initial_capital,
            drawdown_pct: 0.0,
            max_drawdown_pct: 0.0,
            mode: RiskMode::Normal,
            realized_pnl: 0.0,
            positions: HashMap::new(),
            tick_returns: VecDeque::with_capacity(vol_breaker_window),
            vol_samples: VecDeque::with_capacity(VOL_SAMPLE_HISTORY),
        }
    }

    pub fn snapshot(&self, instrument: &str) -> RiskSnapshot {
        RiskSnapshot {
            mode: self.mode,
            equity: self.equity,
            high_water_mark: self.high_water_mark,
            drawdown_pct: self.drawdown_pct,
            max_drawdown_pct: self.max_drawdown_pct,
            position: self
                .positions
                .get(instrument)
                .map(|p| p.notional)
                .unwrap_or(0.0),
            total_exposure: self.total_exposure(),
            realized_pnl: self.realized_pnl,
        }
    }

    pub fn mode(&self) -> RiskMode {
        self.mode
    }

    /// Apply the ordered rules to a signed proposal. The first rule that
    /// alters the size is recorded.
    pub fn govern(&self, instrument: &str, proposed: f64) -> Governed {
        let mut size = proposed;
        let mut rule: Option<RiskRule> = None;
        let capital = self.equity.max(0.0);
        let current = self
            .positions
            .get(instrument)
            .map(|p| p.notional)
            .unwrap_or(0.0);

        // 1. Per-instrument cap
        let limit = self.max_position_fraction * capital;
        if size != 0.0 && (current + size).abs() > limit {
            let scaled = (current + size).signum() * limit - current;
            if scaled * size <= 0.0 {
                warn!(instrument, proposed, "per-instrument cap veto");
                return Governed {
                    size: 0.0,
                    rule: Some(RiskRule::PerInstrumentCap),
                };
            }
            warn!(instrument, proposed, scaled, "scaled to per-instrument cap");
            size = scaled;
            rule = Some(RiskRule::PerInstrumentCap);
        }

        // 2. Total exposure cap
        let other_exposure = self.total_exposure() - current.abs();
        let total_limit = self.max_total_exposure_fraction * capital;
        if size != 0.0 && other_exposure + (current + size).abs() > total_limit {
            let available = (total_limit - other_exposure).max(0.0);
            let scaled = (current + size).signum() * available - current;
            if scaled * size <= 0.0 {
                warn!(instrument, proposed, "total exposure cap veto");
                return Governed {
                    size: 0.0,
                    rule: Some(RiskRule::TotalExposureCap),
                };
            }
            warn!(instrument, proposed, scaled, "scaled to total exposure cap");
            size = scaled;
            rule = rule.or(Some(RiskRule::TotalExposureCap));
        }

        // 3. Halted book: only same-direction reductions down to flat pass.
        // Growing the position or flipping it through zero is vetoed.
        if self.mode == RiskMode::Halted && size != 0.0 {
            let target = current + size;
            let reduces = target.abs() < current.abs()
                && (target == 0.0 || target.signum() == current.signum());
            if !reduces {
                warn!(instrument, proposed, "halted: non-reducing order vetoed");
                return Governed {
                    size: 0.0,
                    rule: Some(RiskRule::DrawdownHalt),
                };
            }
        }

        // 4. Volatility circuit breaker, this tick only
        if size != 0.0 && self.breaker_tripped() {
            size *= 1.0 - BREAKER_CUT;
            rule = rule.or(Some(RiskRule::CircuitBreaker));
            warn!(instrument, size, "volatility circuit breaker cut");
        }

        Governed { size, rule }
    }

    /// Fold an execution report into exposure, equity and realized PnL.
    /// Returns the realized PnL delta (zero when opening or adding).
    pub fn on_fill(&mut self, fill: &FillReport) -> f64 {
        if !fill.filled_size.is_finite() || !fill.fill_price.is_finite() || fill.fill_price <= 0.0
        {
            error!(?fill, "ignoring malformed fill report");
            return 0.0;
        }
        let mut realized = 0.0;

        let entry = self
            .positions
            .entry(fill.instrument.clone())
            .or_insert(Position {
                notional: 0.0,
                avg_price: fill.fill_price,
            });

        if entry.notional == 0.0 || entry.notional.signum() == fill.filled_size.signum() {
            // Opening or adding: blend the entry price
            let total = entry.notional.abs() + fill.filled_size.abs();
            if total > 0.0 {
                entry.avg_price = (entry.avg_price * entry.notional.abs()
                    + fill.fill_price * fill.filled_size.abs())
                    / total;
            }
            entry.notional += fill.filled_size;
        } else {
            // Reducing or flipping: realize PnL on the closed portion
            let closed = fill.filled_size.abs().min(entry.notional.abs());
            let direction = entry.notional.signum();
            let pnl = closed * direction * (fill.fill_price - entry.avg_price) / entry.avg_price;
            self.realized_pnl += pnl;
            self.equity += pnl;
            realized = pnl;
            entry.notional += fill.filled_size;
            if entry.notional.signum() == fill.filled_size.signum() && entry.notional != 0.0 {
                entry.avg_price = fill.fill_price;
            }
            debug!(instrument = %fill.instrument, pnl, "realized pnl on fill");
        }

        if entry.notional.abs() < 1e-9 {
            self.positions.remove(&fill.instrument);
        }

        self.reevaluate();
        realized
    }

    /// Record the tick return for the circuit breaker baseline. Called once
    /// per committed tick.
    pub fn record_return(&mut self, tick_return: f64) {
        if !tick_return.is_finite() {
            return;
        }
        if self.tick_returns.len() == self.vol_breaker_window {
            self.tick_returns.pop_front();
        }
        self.tick_returns.push_back(tick_return);
        if self.tick_returns.len() == self.vol_breaker_window {
            let vol = stdev(self.tick_returns.iter().copied());
            if self.vol_samples.len() == VOL_SAMPLE_HISTORY {
                self.vol_samples.pop_front();
            }
            self.vol_samples.push_back(vol);
        }
    }

    /// Recompute drawdown and the operating mode. Reduced clears only on a
    /// new high-water mark; Halted never clears here.
    pub fn reevaluate(&mut self) {
        if self.equity > self.high_water_mark {
            self.high_water_mark = self.equity;
            if self.mode == RiskMode::Reduced {
                info!("new high-water mark, clearing reduced mode");
                self.mode = RiskMode::Normal;
            }
        }
        self.drawdown_pct = if self.high_water_mark > 0.0 {
            ((self.high_water_mark - self.equity) / self.high_water_mark).max(0.0)
        } else {
            0.0
        };
        self.max_drawdown_pct = self.max_drawdown_pct.max(self.drawdown_pct);

        if self.mode == RiskMode::Halted {
            return;
        }
        if self.drawdown_pct >= self.halt_threshold {
            error!(
                drawdown = format!("{:.2}%", self.drawdown_pct * 100.0).as_str(),
                "drawdown halt threshold breached, halting"
            );
            self.mode = RiskMode::Halted;
        } else if self.drawdown_pct >= self.reduced_threshold {
            if self.mode == RiskMode::Normal {
                warn!(
                    drawdown = format!("{:.2}%", self.drawdown_pct * 100.0).as_str(),
                    "drawdown reduction threshold breached"
                );
            }
            self.mode = RiskMode::Reduced;
        }
    }

    /// Operator acknowledgment after a halt. Rebases the high-water mark to
    /// current equity and returns to Normal. Idempotent.
    pub fn reset(&mut self) {
        if self.mode != RiskMode::Normal {
            warn!(mode = self.mode.as_str(), "manual risk reset");
        }
        self.mode = RiskMode::Normal;
        self.high_water_mark = self.equity;
        self.drawdown_pct = 0.0;
    }

    /// Direct equity update for mark-to-market moves outside fills
    pub fn update_equity(&mut self, equity: f64) {
        if equity.is_finite() {
            self.equity = equity;
            self.reevaluate();
        }
    }

    fn total_exposure(&self) -> f64 {
        self.positions.values().map(|p| p.notional.abs()).sum()
    }

    fn breaker_tripped(&self) -> bool {
        if self.vol_samples.len() < VOL_SAMPLE_MIN + 1 {
            return false;
        }
        let current = match self.vol_samples.back() {
            Some(&v) => v,
            None => return false,
        };
        let baseline = &self.vol_samples.as_slices();
        let n = self.vol_samples.len() - 1;
        let trailing: f64 = baseline
            .0
            .iter()
            .chain(baseline.1.iter())
            .take(n)
            .sum::<f64>()
            / n as f64;
        trailing > 0.0 && current > self.vol_breaker_ratio * trailing
    }
}

fn stdev(values: impl Iterator<Item = f64>) -> f64 {
    let v: Vec<f64> = values.collect();
    if v.is_empty() {
        return 0.0;
    }
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    (v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn governor() -> RiskGovernor {
        RiskGovernor::new(10_000.0, 0.20, 0.80, 0.15, 0.25, 10, 3.0)
    }

    fn fill(instrument: &str, size: f64, price: f64) -> FillReport {
        FillReport {
            instrument: instrument.to_string(),
            filled_size: size,
            fill_price: price,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_within_limits_passes_untouched() {
        let gov = governor();
        let out = gov.govern("MUC", 1_000.0);
        assert_eq!(out.size, 1_000.0);
        assert!(out.rule.is_none());
    }

    #[test]
    fn test_per_instrument_cap_scales_to_boundary() {
        let gov = governor();
        let out = gov.govern("MUC", 3_000.0);
        assert_eq!(out.size, 2_000.0); // 20% of 10k
        assert_eq!(out.rule, Some(RiskRule::PerInstrumentCap));
    }

    #[test]
    fn test_cap_vetoes_when_scaling_would_flip_sign() {
        let mut gov = governor();
        // Already past the cap from earlier fills: any buy would scale to a sell
        gov.on_fill(&fill("MUC", 2_500.0, 100.0));
        let out = gov.govern("MUC", 100.0);
        assert_eq!(out.size, 0.0);
        assert_eq!(out.rule, Some(RiskRule::PerInstrumentCap));
    }

    #[test]
    fn test_total_exposure_cap_scales() {
        let mut gov = governor();
        gov.on_fill(&fill("A", 2_000.0, 100.0));
        gov.on_fill(&fill("B", 2_000.0, 100.0));
        gov.on_fill(&fill("C", 2_000.0, 100.0));
        gov.on_fill(&fill("D", -1_500.0, 100.0));
        // 7,500 of 8,000 used; a 2,000 proposal in a fresh instrument
        // fits the per-instrument cap but not the book
        let out = gov.govern("E", 2_000.0);
        assert!((out.size - 500.0).abs() < 1e-9);
        assert_eq!(out.rule, Some(RiskRule::TotalExposureCap));
    }

    #[test]
    fn test_drawdown_transitions_in_order() {
        let mut gov = governor();
        assert_eq!(gov.mode(), RiskMode::Normal);

        gov.update_equity(8_400.0); // 16% drawdown
        assert_eq!(gov.mode(), RiskMode::Reduced);

        gov.update_equity(7_400.0); // 26% drawdown
        assert_eq!(gov.mode(), RiskMode::Halted);
    }

    #[test]
    fn test_halted_is_terminal_until_reset() {
        let mut gov = governor();
        gov.update_equity(7_000.0);
        assert_eq!(gov.mode(), RiskMode::Halted);

        // Full recovery does not clear a halt
        gov.update_equity(11_000.0);
        assert_eq!(gov.mode(), RiskMode::Halted);

        gov.reset();
        assert_eq!(gov.mode(), RiskMode::Normal);
        gov.reset(); // idempotent
        assert_eq!(gov.mode(), RiskMode::Normal);
    }

    #[test]
    fn test_halted_passes_reducing_vetoes_increasing() {
        let mut gov = governor();
        gov.on_fill(&fill("MUC", 1_500.0, 100.0));
        gov.update_equity(7_000.0);
        assert_eq!(gov.mode(), RiskMode::Halted);

        let increase = gov.govern("MUC", 200.0);
        assert_eq!(increase.size, 0.0);
        assert_eq!(increase.rule, Some(RiskRule::DrawdownHalt));

        let reduce = gov.govern("MUC", -500.0);
        assert_eq!(reduce.size, -500.0);
        assert!(reduce.rule.is_none());
    }

    #[test]
    fn test_halted_vetoes_flip_through_zero() {
        let mut gov = governor();
        gov.on_fill(&fill("MUC", 1_000.0, 100.0));
        gov.update_equity(7_000.0);
        assert_eq!(gov.mode(), RiskMode::Halted);

        // Would close the long and open a fresh short: smaller magnitude,
        // but new risk in the opposite direction
        let flip = gov.govern("MUC", -1_600.0);
        assert_eq!(flip.size, 0.0);
        assert_eq!(flip.rule, Some(RiskRule::DrawdownHalt));

        // Closing exactly to flat still passes
        let close = gov.govern("MUC", -1_000.0);
        assert_eq!(close.size, -1_000.0);
        assert!(close.rule.is_none());
    }

    #[test]
    fn test_reduced_clears_only_on_new_high_water_mark() {
        let mut gov = governor();
        gov.update_equity(8_400.0);
        assert_eq!(gov.mode(), RiskMode::Reduced);

        // Partial recovery is not enough
        gov.update_equity(9_900.0);
        assert_eq!(gov.mode(), RiskMode::Reduced);

        gov.update_equity(10_100.0);
        assert_eq!(gov.mode(), RiskMode::Normal);
    }

    #[test]
    fn test_circuit_breaker_cuts_for_the_tick() {
        let mut gov = governor();
        // Calm baseline with a little texture so its vol is nonzero
        for i in 0..60 {
            gov.record_return(if i % 2 == 0 { 0.002 } else { 0.0 });
        }
        assert_eq!(gov.govern("MUC", 1_000.0).rule, None);

        // Violent burst: realized vol far above its trailing average
        for i in 0..10 {
            gov.record_return(if i % 2 == 0 { 0.05 } else { -0.05 });
        }
        let out = gov.govern("MUC", 1_000.0);
        assert_eq!(out.rule, Some(RiskRule::CircuitBreaker));
        assert!((out.size - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_fill_reduction_realizes_pnl() {
        let mut gov = governor();
        gov.on_fill(&fill("MUC", 1_000.0, 100.0));
        // Close half at +10%
        gov.on_fill(&fill("MUC", -500.0, 110.0));
        let snap = gov.snapshot("MUC");
        assert!((snap.realized_pnl - 50.0).abs() < 1e-9);
        assert!((snap.position - 500.0).abs() < 1e-9);
        assert!((snap.equity - 10_050.0).abs() < 1e-9);
    }
}
