use crate::error::CoreError;
use crate::models::{FeatureBatch, FeatureVector};
use crate::Result;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Declared physical range for each accepted observation name.
///
/// Typical ranges for the Munich feeds; anything outside is sensor garbage
/// and rejects the whole batch.
const PHYSICAL_RANGES: &[(&str, f64, f64)] = &[
    // Weather
    ("temperature", -20.0, 40.0),
    ("humidity", 0.0, 100.0),
    ("pressure", 950.0, 1050.0),
    ("wind_speed", 0.0, 30.0),
    ("wind_direction", 0.0, 360.0),
    ("cloud_coverage", 0.0, 100.0),
    ("precipitation", 0.0, 50.0),
    // Air quality
    ("aqi", 1.0, 5.0),
    ("co", 0.0, 10000.0),
    ("no2", 0.0, 200.0),
    ("o3", 0.0, 300.0),
    ("pm2_5", 0.0, 100.0),
    ("pm10", 0.0, 200.0),
    // Flights
    ("active_flights", 0.0, 100.0),
    ("departures", 0.0, 50.0),
    ("arrivals", 0.0, 50.0),
    ("avg_delay", -10.0, 60.0),
];

fn physical_range(name: &str) -> Option<(f64, f64)> {
    PHYSICAL_RANGES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, lo, hi)| (*lo, *hi))
}

/// Validates raw observation batches and scales them to [0, 1].
///
/// Scaling is min-max over a rolling window of recently accepted batches,
/// falling back to the declared physical range until the window has at least
/// two samples for a feature. The window is exclusively owned here; nothing
/// else mutates it.
///
/// Two-phase: [`normalize`](Self::normalize) is read-only, [`commit`](Self::commit)
/// applies the window mutation once the tick is known to be within budget.
pub struct FeatureNormalizer {
    window_size: usize,
    window: VecDeque<HashMap<String, f64>>,
    last_valid: Option<FeatureVector>,
}

impl FeatureNormalizer {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            window: VecDeque::with_capacity(window_size),
            last_valid: None,
        }
    }

    /// Validate and scale a batch without touching internal state.
    ///
    /// A batch with an unknown name, a non-finite value or a value outside its
    /// physical range is rejected whole: the previous valid vector is reused
    /// with `stale = true`, or `InvalidInput` surfaces when there is none.
    pub fn normalize(&self, batch: &FeatureBatch) -> Result<FeatureVector> {
        if let Err(reason) = self.validate(batch) {
            warn!(instrument = %batch.instrument, %reason, "rejecting observation batch");
            return match &self.last_valid {
                Some(prev) => Ok(FeatureVector {
                    timestamp: batch.timestamp,
                    values: prev.values.clone(),
                    stale: true,
                }),
                None => Err(CoreError::InvalidInput(reason)),
            };
        }

        let mut values = HashMap::with_capacity(batch.observations.len());
        for (name, &raw) in &batch.observations {
            let (lo, hi) = self.effective_range(name, raw);
            let scaled = if hi > lo { (raw - lo) / (hi - lo) } else { 0.5 };
            values.insert(name.clone(), scaled.clamp(0.0, 1.0));
        }

        debug!(count = values.len(), "normalized observation batch");
        Ok(FeatureVector {
            timestamp: batch.timestamp,
            values,
            stale: false,
        })
    }

    /// Fold the batch into the rolling window. Call only for a tick that
    /// completed within budget, and only for non-stale results.
    pub fn commit(&mut self, batch: &FeatureBatch, vector: &FeatureVector) {
        if vector.stale {
            return;
        }
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(batch.observations.clone());
        self.last_valid = Some(vector.clone());
    }

    fn validate(&self, batch: &FeatureBatch) -> std::result::Result<(), String> {
        if batch.observations.is_empty() {
            return Err("empty observation batch".to_string());
        }
        for (name, &value) in &batch.observations {
            let (lo, hi) = match physical_range(name) {
                Some(range) => range,
                None => return Err(format!("unknown observation '{}'", name)),
            };
            if !value.is_finite() {
                return Err(format!("non-finite value for '{}'", name));
            }
            if value < lo || value > hi {
                return Err(format!(
                    "'{}' = {} outside physical range [{}, {}]",
                    name, value, lo, hi
                ));
            }
        }
        Ok(())
    }

    /// Window min/max for the feature, widened by the incoming value; physical
    /// range until at least two windowed samples exist.
    fn effective_range(&self, name: &str, current: f64) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        let mut count = 0usize;
        for sample in &self.window {
            if let Some(&v) = sample.get(name) {
                lo = lo.min(v);
                hi = hi.max(v);
                count += 1;
            }
        }
        if count < 2 {
            return physical_range(name).unwrap_or((0.0, 1.0));
        }
        (lo.min(current), hi.max(current))
    }
}
