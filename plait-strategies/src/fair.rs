//! Fair composition of PCT with a random tail

use crate::error::StrategyResult;
use crate::pct::PctStrategy;
use crate::random::RandomStrategy;
use crate::strategy::{ExplorationStrategy, OperationId};
use crate::trace::ExecutionTrace;

/// PCT for the unfair prefix, uniform random past the unfair step bound
///
/// PCT alone can starve an operation forever, which makes every liveness
/// property trivially fail. Switching to a random strategy after
/// `unfair_bound` decisions restores weak fairness while keeping PCT's
/// bug-finding power in the prefix where most bugs live.
#[derive(Debug)]
pub struct FairPctStrategy {
    pct: PctStrategy,
    random: RandomStrategy,
    unfair_bound: u64,
    steps: u64,
    max_fair_steps: u64,
}

impl FairPctStrategy {
    /// Compose PCT with a random fair tail
    pub fn new(base_seed: u64, change_points: u32, max_fair_steps: u64, unfair_bound: u64) -> Self {
        // The PCT prefix only ever sees `unfair_bound` decisions, so its
        // change-point horizon is the prefix, not the whole iteration.
        Self {
            pct: PctStrategy::new(base_seed, change_points, unfair_bound),
            random: RandomStrategy::new(base_seed, max_fair_steps),
            unfair_bound,
            steps: 0,
            max_fair_steps,
        }
    }

    fn in_prefix(&self) -> bool {
        self.steps <= self.unfair_bound
    }
}

impl ExplorationStrategy for FairPctStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64, trace_so_far: &ExecutionTrace) -> bool {
        self.steps = 0;
        let pct_continue = self.pct.initialize_next_iteration(iteration, trace_so_far);
        let random_continue = self.random.initialize_next_iteration(iteration, trace_so_far);
        pct_continue && random_continue
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: OperationId,
        is_yielding: bool,
    ) -> StrategyResult<Option<OperationId>> {
        self.steps += 1;
        if self.in_prefix() {
            self.pct.next_operation(enabled, current, is_yielding)
        } else {
            self.random.next_operation(enabled, current, is_yielding)
        }
    }

    fn next_bool(&mut self) -> StrategyResult<bool> {
        if self.in_prefix() {
            self.pct.next_bool()
        } else {
            self.random.next_bool()
        }
    }

    fn next_int(&mut self, bound: u32) -> StrategyResult<u32> {
        if self.in_prefix() {
            self.pct.next_int(bound)
        } else {
            self.random.next_int(bound)
        }
    }

    fn step_count(&self) -> u64 {
        self.steps
    }

    fn has_reached_max_steps(&self) -> bool {
        self.steps >= self.max_fair_steps
    }

    fn is_fair(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("fair-pct:{}", self.pct.description())
    }
}
