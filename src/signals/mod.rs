pub mod combiner;
pub mod generator;
pub mod normalizer;

pub use combiner::SignalCombiner;
pub use generator::SignalGenerator;
pub use normalizer::FeatureNormalizer;
