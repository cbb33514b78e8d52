use thiserror::Error;

/// Failure modes of a decision cycle.
///
/// Every variant maps to a structured abstention cause at the pipeline
/// boundary; none of these escape as a panic or a missing outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Input data the core cannot work with (bad price, rejected batch with
    /// no prior vector, invalid parameter override)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Not enough feature signals could be produced this tick
    #[error("incomplete features: produced {got}, need {need}")]
    IncompleteFeatures { got: usize, need: usize },

    /// Too few signals reached the combiner
    #[error("insufficient signals: got {got}, need {need}")]
    InsufficientSignals { got: usize, need: usize },

    /// The decision cycle overran its latency budget
    #[error("tick exceeded latency budget of {budget_ms}ms")]
    TimeoutExceeded { budget_ms: u64 },

    /// Internal invariant violation (non-finite arithmetic, table corruption)
    #[error("core fault: {0}")]
    CoreFault(String),
}
