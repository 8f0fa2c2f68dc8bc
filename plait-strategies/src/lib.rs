//! Exploration strategies for systematic concurrency testing
//!
//! A strategy decides which operation runs next at every scheduling point
//! and resolves every nondeterministic boolean/integer choice the program
//! under test makes. All strategies draw randomness exclusively from the
//! seeded [`ValueGenerator`], which is what makes an iteration replayable:
//! identical (strategy, seed, trace prefix) produces an identical schedule.
//!
//! Strategy variants:
//! - [`RandomStrategy`]: uniform choice at every decision point (fair)
//! - [`ProbabilisticStrategy`]: coin-biased walk preferring the running op
//! - [`PctStrategy`]: priority-based concurrency testing (unfair)
//! - [`FairPctStrategy`]: PCT with a random fair tail
//! - [`DfsBoundedStrategy`]: bounded enumeration of the decision tree
//! - [`ReplayStrategy`]: follows a persisted [`ExecutionTrace`] exactly

pub mod dfs;
pub mod error;
pub mod fair;
pub mod pct;
pub mod probabilistic;
pub mod random;
pub mod replay;
pub mod rng;
pub mod strategy;
pub mod trace;

pub use dfs::DfsBoundedStrategy;
pub use error::{StrategyError, StrategyResult};
pub use fair::FairPctStrategy;
pub use pct::PctStrategy;
pub use probabilistic::ProbabilisticStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;
pub use rng::ValueGenerator;
pub use strategy::{build_strategy, ExplorationStrategy, OperationId};
pub use trace::{Decision, ExecutionTrace, TraceFile};
