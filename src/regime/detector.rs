use crate::models::Regime;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Fixed volatility bands (annualized) used until enough history exists to
/// derive trailing percentile bands
const HIGH_VOL_FALLBACK: f64 = 0.30;
const LOW_VOL_FALLBACK: f64 = 0.10;

/// |trend| and mean-reversion scores must clear this to nominate a candidate
const STRONG_TREND_THRESHOLD: f64 = 0.3;
const STRONG_MEAN_REV_THRESHOLD: f64 = 0.3;

/// Confidence multiplier applied while the detector stays on a regime it can
/// no longer confirm
const CONFIDENCE_DECAY: f64 = 0.9;

/// Volatility samples kept for the trailing percentile bands, and how many
/// are needed before the bands replace the fixed fallbacks
const VOL_HISTORY_SIZE: usize = 100;
const VOL_BAND_MIN_SAMPLES: usize = 30;

const TICKS_PER_YEAR: f64 = 252.0;

/// Result of assessing one tick, applied to the detector via `commit`.
#[derive(Debug, Clone)]
pub struct RegimeAssessment {
    pub regime: Regime,
    pub confidence: f64,
    /// The detector swapped regimes this tick
    pub changed: bool,
    previous: Regime,
    below_count: u32,
    new_return: f64,
    new_vol: Option<f64>,
}

impl RegimeAssessment {
    pub fn previous(&self) -> Regime {
        self.previous
    }
}

/// Classifies market state from a rolling return series.
///
/// Volatility (annualized stdev) is compared against trailing percentile
/// bands of its own history; trend uses a fast/slow moving-average crossover
/// on cumulative prices; mean reversion uses lag-1 autocorrelation. A regime
/// only swaps in when its confidence clears the configured threshold, so a
/// single noisy tick cannot flap the strategy parameters.
pub struct RegimeDetector {
    return_window: usize,
    confidence_threshold: f64,
    reset_ticks: u32,
    returns: VecDeque<f64>,
    vol_history: VecDeque<f64>,
    current: Regime,
    confidence: f64,
    below_count: u32,
}

impl RegimeDetector {
    pub fn new(return_window: usize, confidence_threshold: f64, reset_ticks: u32) -> Self {
        Self {
            return_window,
            confidence_threshold,
            reset_ticks,
            returns: VecDeque::with_capacity(return_window + 1),
            vol_history: VecDeque::with_capacity(VOL_HISTORY_SIZE),
            current: Regime::Uncertain,
            confidence: 0.0,
            below_count: 0,
        }
    }

    pub fn current(&self) -> Regime {
        self.current
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Classify with the new return appended, without mutating state.
    pub fn assess(&self, new_return: f64) -> RegimeAssessment {
        let mut series: Vec<f64> = self.returns.iter().copied().collect();
        series.push(new_return);
        if series.len() > self.return_window {
            let excess = series.len() - self.return_window;
            series.drain(..excess);
        }

        if series.len() < self.return_window {
            debug!(
                got = series.len(),
                need = self.return_window,
                "insufficient returns for regime classification"
            );
            return RegimeAssessment {
                regime: Regime::Uncertain,
                confidence: 0.0,
                changed: self.current != Regime::Uncertain,
                previous: self.current,
                below_count: 0,
                new_return,
                new_vol: None,
            };
        }

        let volatility = annualized_volatility(&series);
        let trend = trend_strength(&series);
        let mean_rev = (-autocorrelation(&series, 1)).clamp(-1.0, 1.0);

        let (candidate, score) = self.classify(volatility, trend, mean_rev);

        let (regime, confidence, below_count) = if score >= self.confidence_threshold {
            (candidate, score, 0)
        } else {
            // Hold the previous regime with decayed confidence; after enough
            // consecutive misses, fall back to Uncertain
            let below = self.below_count + 1;
            if below >= self.reset_ticks {
                (Regime::Uncertain, score, 0)
            } else {
                (self.current, self.confidence * CONFIDENCE_DECAY, below)
            }
        };

        RegimeAssessment {
            regime,
            confidence: confidence.clamp(0.0, 1.0),
            changed: regime != self.current,
            previous: self.current,
            below_count,
            new_return,
            new_vol: Some(volatility),
        }
    }

    /// Apply an assessment produced by [`assess`](Self::assess).
    pub fn commit(&mut self, assessment: &RegimeAssessment) {
        self.returns.push_back(assessment.new_return);
        if self.returns.len() > self.return_window {
            self.returns.pop_front();
        }
        if let Some(vol) = assessment.new_vol {
            if self.vol_history.len() == VOL_HISTORY_SIZE {
                self.vol_history.pop_front();
            }
            self.vol_history.push_back(vol);
        }
        if assessment.changed {
            info!(
                old = assessment.previous.as_str(),
                new = assessment.regime.as_str(),
                confidence = format!("{:.3}", assessment.confidence).as_str(),
                "regime change"
            );
        }
        self.current = assessment.regime;
        self.confidence = assessment.confidence;
        self.below_count = assessment.below_count;
    }

    /// Score every nominated regime and pick a winner. A high-volatility
    /// nomination beats directional candidates outright; otherwise the
    /// highest score wins.
    fn classify(&self, volatility: f64, trend: f64, mean_rev: f64) -> (Regime, f64) {
        let (low_band, high_band) = self.volatility_bands();

        if volatility > high_band {
            let score = ((volatility - high_band) / high_band).min(1.0);
            return (Regime::HighVolatility, score);
        }

        let mut candidates: Vec<(Regime, f64)> = Vec::new();
        if volatility < low_band {
            candidates.push((Regime::LowVolatility, 1.0 - volatility / low_band));
        }
        if trend.abs() > STRONG_TREND_THRESHOLD {
            candidates.push((
                Regime::Trending,
                ((trend.abs() - STRONG_TREND_THRESHOLD) / STRONG_TREND_THRESHOLD).min(1.0),
            ));
        }
        if mean_rev > STRONG_MEAN_REV_THRESHOLD {
            candidates.push((
                Regime::MeanReverting,
                ((mean_rev - STRONG_MEAN_REV_THRESHOLD) / STRONG_MEAN_REV_THRESHOLD).min(1.0),
            ));
        }

        candidates
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((Regime::Uncertain, 0.0))
    }

    /// Trailing percentile bands over the detector's own volatility history;
    /// fixed fallbacks until the history is long enough to be meaningful.
    fn volatility_bands(&self) -> (f64, f64) {
        if self.vol_history.len() < VOL_BAND_MIN_SAMPLES {
            return (LOW_VOL_FALLBACK, HIGH_VOL_FALLBACK);
        }
        let mut sorted: Vec<f64> = self.vol_history.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let low = percentile(&sorted, 0.20);
        let high = percentile(&sorted, 0.80);
        if high > low {
            (low, high)
        } else {
            (LOW_VOL_FALLBACK, HIGH_VOL_FALLBACK)
        }
    }
}

fn annualized_volatility(returns: &[f64]) -> f64 {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() * TICKS_PER_YEAR.sqrt()
}

/// Fast/slow moving-average crossover on cumulative prices, normalized by the
/// slow average. Positive = uptrend.
fn trend_strength(returns: &[f64]) -> f64 {
    let mut prices = Vec::with_capacity(returns.len());
    let mut level = 1.0;
    for r in returns {
        level *= 1.0 + r;
        prices.push(level);
    }
    let fast_window = (prices.len() / 2).max(2);
    let fast: f64 = prices[prices.len() - fast_window..].iter().sum::<f64>() / fast_window as f64;
    let slow: f64 = prices.iter().sum::<f64>() / prices.len() as f64;
    if slow > 0.0 {
        ((fast - slow) / slow).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn autocorrelation(data: &[f64], lag: usize) -> f64 {
    if data.len() < lag + 1 {
        return 0.0;
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let demeaned: Vec<f64> = data.iter().map(|x| x - mean).collect();
    let c0 = demeaned.iter().map(|x| x * x).sum::<f64>() / n;
    if c0 == 0.0 {
        return 0.0;
    }
    let c_lag = demeaned[..demeaned.len() - lag]
        .iter()
        .zip(&demeaned[lag..])
        .map(|(a, b)| a * b)
        .sum::<f64>()
        / n;
    c_lag / c0
}

/// Nearest-rank percentile of a pre-sorted slice
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(detector: &mut RegimeDetector, returns: &[f64]) -> RegimeAssessment {
        let mut last = None;
        for &r in returns {
            let assessment = detector.assess(r);
            detector.commit(&assessment);
            last = Some(assessment);
        }
        last.expect("non-empty return series")
    }

    /// Alternating swings: violent annualized volatility
    fn swings(n: usize) -> Vec<f64> {
        (0..n).map(|i| if i % 2 == 0 { 0.08 } else { -0.08 }).collect()
    }

    /// Moderate two-up/two-down pattern: volatility between the bands, no
    /// trend, roughly zero lag-1 autocorrelation
    fn ambiguous(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| if (i / 2) % 2 == 0 { 0.01 } else { -0.01 })
            .collect()
    }

    #[test]
    fn test_starts_uncertain() {
        let detector = RegimeDetector::new(20, 0.7, 5);
        assert_eq!(detector.current(), Regime::Uncertain);
        assert_eq!(detector.confidence(), 0.0);
    }

    #[test]
    fn test_uncertain_below_return_window() {
        let mut detector = RegimeDetector::new(20, 0.7, 5);
        let last = feed(&mut detector, &[0.01; 5]);
        assert_eq!(last.regime, Regime::Uncertain);
        assert_eq!(last.confidence, 0.0);
    }

    #[test]
    fn test_wild_swings_classify_high_volatility() {
        let mut detector = RegimeDetector::new(20, 0.7, 5);
        let last = feed(&mut detector, &swings(25));
        assert_eq!(last.regime, Regime::HighVolatility);
        assert!(last.confidence >= 0.7);
    }

    #[test]
    fn test_flat_returns_classify_low_volatility() {
        let mut detector = RegimeDetector::new(20, 0.7, 5);
        let calm: Vec<f64> = (0..25).map(|i| 0.0001 * ((i % 3) as f64)).collect();
        let last = feed(&mut detector, &calm);
        assert_eq!(last.regime, Regime::LowVolatility);
        assert!(last.confidence >= 0.7);
    }

    #[test]
    fn test_steady_drift_classifies_trending() {
        let mut detector = RegimeDetector::new(20, 0.7, 5);
        // Strong compounding drift with mild block noise: fast MA pulls far
        // ahead of the slow MA while volatility stays between the bands
        let drift: Vec<f64> = (0..25)
            .map(|i| 0.14 + if (i / 3) % 2 == 0 { 0.007 } else { -0.007 })
            .collect();
        let last = feed(&mut detector, &drift);
        assert_eq!(last.regime, Regime::Trending);
        assert!(last.confidence >= 0.7);
    }

    #[test]
    fn test_alternating_moderate_returns_classify_mean_reverting() {
        let mut detector = RegimeDetector::new(20, 0.7, 5);
        // Strict up/down alternation at moderate size: lag-1 autocorrelation
        // near -1 with volatility between the bands
        let fade: Vec<f64> = (0..25)
            .map(|i| if i % 2 == 0 { 0.012 } else { -0.012 })
            .collect();
        let last = feed(&mut detector, &fade);
        assert_eq!(last.regime, Regime::MeanReverting);
        assert!(last.confidence >= 0.7);
    }

    #[test]
    fn test_regime_holds_with_decayed_confidence() {
        // Long reset horizon so the hold path is observable
        let mut detector = RegimeDetector::new(6, 0.7, 100);
        feed(&mut detector, &swings(10));
        assert_eq!(detector.current(), Regime::HighVolatility);

        // Flush the window with ambiguous returns until no candidate clears
        // the threshold; the regime must hold while confidence decays
        feed(&mut detector, &ambiguous(8));
        assert_eq!(detector.current(), Regime::HighVolatility);
        assert!(detector.confidence() < 1.0);
    }

    #[test]
    fn test_resets_to_uncertain_after_consecutive_misses() {
        let mut detector = RegimeDetector::new(6, 0.7, 5);
        feed(&mut detector, &swings(10));
        assert_eq!(detector.current(), Regime::HighVolatility);

        feed(&mut detector, &ambiguous(20));
        assert_eq!(detector.current(), Regime::Uncertain);
    }

    #[test]
    fn test_assess_without_commit_leaves_state_unchanged() {
        let mut detector = RegimeDetector::new(20, 0.7, 5);
        feed(&mut detector, &swings(25));
        let regime = detector.current();
        let confidence = detector.confidence();

        for _ in 0..10 {
            let _ = detector.assess(0.0);
        }
        assert_eq!(detector.current(), regime);
        assert_eq!(detector.confidence(), confidence);
    }
}
