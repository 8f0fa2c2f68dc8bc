//! Engine-level errors and exit codes

use thiserror::Error;

use plait_config::ConfigError;
use plait_strategies::StrategyError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that abort a test run before or outside an iteration
#[derive(Error, Debug)]
pub enum EngineError {
    /// The configuration failed validation
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A strategy could not be built from the configuration
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),

    /// The test input carries no (or an incompatible) rewritten marker
    #[error("input is not rewritten for controlled testing")]
    NotRewritten,

    /// A scheduler invariant was violated; always fatal
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Process exit code for this error (2 internal, 3 non-rewritten,
    /// 4 configuration)
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Configuration(_) | EngineError::Strategy(_) => 4,
            EngineError::NotRewritten => 3,
            EngineError::Internal(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            EngineError::Configuration(ConfigError::Validation("x".into())).exit_code(),
            4
        );
        assert_eq!(
            EngineError::Strategy(StrategyError::MissingReplayTrace).exit_code(),
            4
        );
        assert_eq!(EngineError::NotRewritten.exit_code(), 3);
        assert_eq!(EngineError::Internal("bad".into()).exit_code(), 2);
    }
}
