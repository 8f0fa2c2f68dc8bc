// Configuration loading and management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error types for configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(String),

    /// TOML parsing failed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A field value is out of its valid range
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Exploration strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Uniform random scheduling at every decision point
    Random,
    /// Coin-biased random walk that prefers the running operation
    Probabilistic,
    /// Priority-based probabilistic concurrency testing (unfair)
    Pct,
    /// PCT with a random fair tail past the unfair step bound
    FairPct,
    /// Bounded depth-first enumeration of the decision tree
    DfsBounded,
    /// Follow a persisted execution trace exactly
    Replay,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::Random => "random",
            StrategyKind::Probabilistic => "probabilistic",
            StrategyKind::Pct => "pct",
            StrategyKind::FairPct => "fair-pct",
            StrategyKind::DfsBounded => "dfs-bounded",
            StrategyKind::Replay => "replay",
        };
        write!(f, "{}", name)
    }
}

/// Log verbosity for engine output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Only bugs and fatal errors
    Quiet,
    /// Iteration summaries
    Normal,
    /// Every scheduling decision
    Detailed,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Normal
    }
}

/// Immutable engine configuration
///
/// Loading hierarchy: env > file > defaults. Unknown fields in
/// configuration files are ignored so older engines can read newer files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Exploration strategy driving scheduling decisions
    pub strategy: StrategyKind,
    /// Maximum number of test iterations per run
    pub max_iterations: u64,
    /// Step bound for fair strategies
    pub max_fair_steps: u64,
    /// Step bound for unfair strategies
    pub max_unfair_steps: u64,
    /// Base random seed; iteration `i` uses `seed + i`
    pub seed: u64,
    /// Whether hot monitor states are reported as liveness violations
    pub is_liveness_checking_enabled: bool,
    /// Wall-clock budget for the whole run, in seconds (0 = unbounded)
    pub timeout_secs: u64,
    /// Fall back to randomized delay fuzzing when uncontrolled
    /// concurrency is detected
    pub systematic_fuzzing_fallback: bool,
    /// Record state fingerprints and use them for livelock detection
    pub fingerprinting: bool,
    /// Engine log verbosity
    pub verbosity: Verbosity,
    /// Keep exploring after the first bug, counting every bug found
    pub exhaustive: bool,
    /// Number of priority change points for PCT and FairPCT
    pub pct_change_points: u32,
    /// Coin difficulty for the probabilistic strategy: the running
    /// operation is preempted with probability 1/2^difficulty
    pub probabilistic_difficulty: u32,
    /// Decision-tree depth bound for the DFS strategy
    pub dfs_max_depth: u32,
    /// Require a rewritten-artifact marker before testing
    pub strict_rewritten_check: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Random,
            max_iterations: 100,
            max_fair_steps: 10_000,
            max_unfair_steps: 100_000,
            seed: 0,
            is_liveness_checking_enabled: true,
            timeout_secs: 0,
            systematic_fuzzing_fallback: false,
            fingerprinting: false,
            verbosity: Verbosity::Normal,
            exhaustive: false,
            pct_change_points: 10,
            probabilistic_difficulty: 3,
            dfs_max_depth: 100,
            strict_rewritten_check: false,
        }
    }
}

impl Configuration {
    /// Configuration with a specific strategy, other fields defaulted
    pub fn with_strategy(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Wall-clock budget as a `Duration`, `None` when unbounded
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}

/// Load configuration from a file and environment variables
///
/// Loading hierarchy: env > file > defaults
pub fn load_config<P: AsRef<Path>>(path: P) -> ConfigResult<Configuration> {
    let path = path.as_ref();

    let mut config = if path.exists() {
        load_from_file(path)?
    } else {
        Configuration::default()
    };

    // Apply environment variable overrides
    crate::env::apply_env_overrides(&mut config)?;

    // Validate configuration
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a file path
pub fn load_from_file(path: &Path) -> ConfigResult<Configuration> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Validate configuration
pub fn validate_config(config: &Configuration) -> ConfigResult<()> {
    if config.max_iterations == 0 {
        return Err(ConfigError::Validation(
            "max_iterations must be at least 1".to_string(),
        ));
    }

    if config.max_fair_steps == 0 || config.max_unfair_steps == 0 {
        return Err(ConfigError::Validation(
            "step bounds must be at least 1".to_string(),
        ));
    }

    if config.pct_change_points == 0 {
        return Err(ConfigError::Validation(
            "pct_change_points must be at least 1".to_string(),
        ));
    }

    if config.probabilistic_difficulty == 0 || config.probabilistic_difficulty > 16 {
        return Err(ConfigError::Validation(format!(
            "probabilistic_difficulty {} outside 1..=16",
            config.probabilistic_difficulty
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_case::test_case;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = Configuration::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.strategy, StrategyKind::Random);
        assert_eq!(config.max_fair_steps, 10_000);
        assert_eq!(config.max_unfair_steps, 100_000);
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "strategy = \"pct\"\nmax_iterations = 500\nseed = 7\npct_change_points = 3"
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.strategy, StrategyKind::Pct);
        assert_eq!(config.max_iterations, 500);
        assert_eq!(config.seed, 7);
        assert_eq!(config.pct_change_points, 3);
        // Unspecified fields fall back to defaults
        assert_eq!(config.max_fair_steps, 10_000);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let config: Configuration =
            toml::from_str("strategy = \"random\"\nfuture_option = true").unwrap();
        assert_eq!(config.strategy, StrategyKind::Random);
    }

    #[test_case(0, 10_000, 100_000 => false ; "zero iterations")]
    #[test_case(10, 0, 100_000 => false ; "zero fair steps")]
    #[test_case(10, 10_000, 0 => false ; "zero unfair steps")]
    #[test_case(10, 10_000, 100_000 => true ; "defaults")]
    fn test_validation(iterations: u64, fair: u64, unfair: u64) -> bool {
        let config = Configuration {
            max_iterations: iterations,
            max_fair_steps: fair,
            max_unfair_steps: unfair,
            ..Configuration::default()
        };
        validate_config(&config).is_ok()
    }

    #[test]
    fn test_strategy_kind_round_trip() {
        for kind in [
            StrategyKind::Random,
            StrategyKind::Probabilistic,
            StrategyKind::Pct,
            StrategyKind::FairPct,
            StrategyKind::DfsBounded,
            StrategyKind::Replay,
        ] {
            let text = toml::to_string(&Configuration::with_strategy(kind)).unwrap();
            let parsed: Configuration = toml::from_str(&text).unwrap();
            assert_eq!(parsed.strategy, kind);
        }
    }
}
