pub mod feed;
pub mod pipeline;

pub use feed::{snapshot_channel, IntakeBuffer};
pub use pipeline::{DecisionPipeline, TickResult};
