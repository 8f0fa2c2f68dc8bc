//! The exploration strategy contract
//!
//! The scheduler consults a strategy at every scheduling point and for
//! every nondeterministic choice. Strategies are trait objects: dynamic
//! dispatch is fine here because decisions happen at suspension points,
//! not in tight loops.

use serde::{Deserialize, Serialize};

use plait_config::{Configuration, StrategyKind};

use crate::error::{StrategyError, StrategyResult};
use crate::trace::{ExecutionTrace, TraceFile};

/// Identifier of a schedulable operation within one test iteration
///
/// Ids are assigned sequentially starting at 0; the root operation of an
/// iteration is always id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl OperationId {
    /// The raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op({})", self.0)
    }
}

/// Pluggable exploration strategy
///
/// Contract:
/// - `next_operation` returns `Ok(None)` only when `enabled` is empty,
///   which the scheduler treats as a deadlock signal.
/// - `enabled` is always sorted by operation id, so strategies that
///   iterate it are deterministic by construction.
/// - All randomness comes from a seeded [`crate::ValueGenerator`]; a
///   strategy must not consult time, system randomness, or thread ids.
pub trait ExplorationStrategy: Send {
    /// Prepare for iteration `iteration`; returns false to halt exploration
    fn initialize_next_iteration(
        &mut self,
        iteration: u64,
        trace_so_far: &ExecutionTrace,
    ) -> bool;

    /// Pick the next operation to schedule among `enabled`
    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: OperationId,
        is_yielding: bool,
    ) -> StrategyResult<Option<OperationId>>;

    /// Resolve a nondeterministic boolean choice
    fn next_bool(&mut self) -> StrategyResult<bool>;

    /// Resolve a nondeterministic integer choice in `[0, bound)`
    fn next_int(&mut self, bound: u32) -> StrategyResult<u32>;

    /// Number of scheduling decisions made this iteration
    fn step_count(&self) -> u64;

    /// Whether the step bound for this strategy has been exhausted
    fn has_reached_max_steps(&self) -> bool;

    /// Whether the strategy guarantees weak fairness (required for
    /// meaningful liveness checking)
    fn is_fair(&self) -> bool;

    /// Human-readable description, e.g. `pct:10`
    fn description(&self) -> String;
}

/// Build a strategy from an engine configuration
///
/// `replay_trace` is consumed only by [`StrategyKind::Replay`]; requesting
/// replay without a trace is a configuration error surfaced as
/// [`StrategyError::MissingReplayTrace`].
pub fn build_strategy(
    config: &Configuration,
    replay_trace: Option<TraceFile>,
) -> StrategyResult<Box<dyn ExplorationStrategy>> {
    let strategy: Box<dyn ExplorationStrategy> = match config.strategy {
        StrategyKind::Random => Box::new(crate::RandomStrategy::new(
            config.seed,
            config.max_fair_steps,
        )),
        StrategyKind::Probabilistic => Box::new(crate::ProbabilisticStrategy::new(
            config.seed,
            config.probabilistic_difficulty,
            config.max_fair_steps,
        )),
        StrategyKind::Pct => Box::new(crate::PctStrategy::new(
            config.seed,
            config.pct_change_points,
            config.max_unfair_steps,
        )),
        StrategyKind::FairPct => Box::new(crate::FairPctStrategy::new(
            config.seed,
            config.pct_change_points,
            config.max_fair_steps,
            config.max_unfair_steps,
        )),
        StrategyKind::DfsBounded => Box::new(crate::DfsBoundedStrategy::new(
            config.dfs_max_depth,
            config.max_unfair_steps,
        )),
        StrategyKind::Replay => {
            let trace = replay_trace.ok_or(StrategyError::MissingReplayTrace)?;
            Box::new(crate::ReplayStrategy::from_file(trace))
        }
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_strategy_for_every_kind() {
        for kind in [
            StrategyKind::Random,
            StrategyKind::Probabilistic,
            StrategyKind::Pct,
            StrategyKind::FairPct,
            StrategyKind::DfsBounded,
        ] {
            let config = Configuration::with_strategy(kind);
            let strategy = build_strategy(&config, None).unwrap();
            assert!(!strategy.description().is_empty());
        }
    }

    #[test]
    fn test_replay_requires_a_trace() {
        let config = Configuration::with_strategy(StrategyKind::Replay);
        assert!(matches!(
            build_strategy(&config, None),
            Err(StrategyError::MissingReplayTrace)
        ));
    }
}
