pub mod detector;
pub mod parameters;

pub use detector::{RegimeAssessment, RegimeDetector};
pub use parameters::{ParameterTable, StrategyParameters};

use crate::models::Regime;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Emitted once per regime swap, carrying the parameter set that takes effect
#[derive(Debug, Clone, Serialize)]
pub struct RegimeChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub old: Regime,
    pub new: Regime,
    pub confidence: f64,
    pub parameters: StrategyParameters,
}
