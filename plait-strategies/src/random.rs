//! Uniform random exploration

use crate::error::StrategyResult;
use crate::rng::ValueGenerator;
use crate::strategy::{ExplorationStrategy, OperationId};
use crate::trace::ExecutionTrace;

/// Picks uniformly among enabled operations at every scheduling point
///
/// Random scheduling is weakly fair: every enabled operation is chosen
/// with nonzero probability at every decision, so no operation starves
/// forever with probability one.
#[derive(Debug)]
pub struct RandomStrategy {
    base_seed: u64,
    generator: ValueGenerator,
    steps: u64,
    max_steps: u64,
}

impl RandomStrategy {
    /// Create a random strategy with a base seed and a step bound
    pub fn new(base_seed: u64, max_steps: u64) -> Self {
        Self {
            base_seed,
            generator: ValueGenerator::new(base_seed),
            steps: 0,
            max_steps,
        }
    }
}

impl ExplorationStrategy for RandomStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64, _trace_so_far: &ExecutionTrace) -> bool {
        self.steps = 0;
        self.generator = ValueGenerator::new(self.base_seed.wrapping_add(iteration));
        true
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        _current: OperationId,
        _is_yielding: bool,
    ) -> StrategyResult<Option<OperationId>> {
        if enabled.is_empty() {
            return Ok(None);
        }
        self.steps += 1;
        let index = self.generator.next_int(enabled.len() as u32) as usize;
        Ok(Some(enabled[index]))
    }

    fn next_bool(&mut self) -> StrategyResult<bool> {
        Ok(self.generator.next_bool())
    }

    fn next_int(&mut self, bound: u32) -> StrategyResult<u32> {
        Ok(self.generator.next_int(bound))
    }

    fn step_count(&self) -> u64 {
        self.steps
    }

    fn has_reached_max_steps(&self) -> bool {
        self.steps >= self.max_steps
    }

    fn is_fair(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        "random".to_string()
    }
}
