pub mod metrics;

pub use metrics::{MetricsCollector, MetricsSnapshot, RegimeStats};
