//! Error types for exploration strategies

use thiserror::Error;

/// Result type for strategy operations
pub type StrategyResult<T> = Result<T, StrategyError>;

/// Error types for strategy decisions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// A replayed execution observed something the trace did not predict
    #[error("trace replay diverged at decision {index}: expected {expected}, observed {observed}")]
    ReplayDivergence {
        /// Index of the diverging decision in the trace
        index: usize,
        /// What the trace recorded
        expected: String,
        /// What the replayed execution observed
        observed: String,
    },

    /// The replayed execution requested more decisions than the trace holds
    #[error("trace replay exhausted after {index} decisions")]
    ReplayExhausted {
        /// Number of decisions the trace holds
        index: usize,
    },

    /// A replay strategy was requested without a trace to follow
    #[error("replay strategy requires a persisted trace")]
    MissingReplayTrace,
}
