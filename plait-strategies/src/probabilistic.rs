//! Coin-biased random exploration

use crate::error::StrategyResult;
use crate::rng::ValueGenerator;
use crate::strategy::{ExplorationStrategy, OperationId};
use crate::trace::ExecutionTrace;

/// Random walk that keeps the running operation with high probability
///
/// At every scheduling point the running operation is preempted only if
/// `difficulty` consecutive fair coins all come up heads, i.e. with
/// probability `1/2^difficulty`. Long atomic-looking blocks survive intact
/// most of the time, which exposes bugs that need a rare preemption at a
/// specific point.
#[derive(Debug)]
pub struct ProbabilisticStrategy {
    base_seed: u64,
    generator: ValueGenerator,
    difficulty: u32,
    steps: u64,
    max_steps: u64,
}

impl ProbabilisticStrategy {
    /// Create a probabilistic strategy; `difficulty` is the number of
    /// coin flips a preemption must win
    pub fn new(base_seed: u64, difficulty: u32, max_steps: u64) -> Self {
        Self {
            base_seed,
            generator: ValueGenerator::new(base_seed),
            difficulty: difficulty.max(1),
            steps: 0,
            max_steps,
        }
    }

    fn preemption_wins(&mut self) -> bool {
        (0..self.difficulty).all(|_| self.generator.next_bool())
    }
}

impl ExplorationStrategy for ProbabilisticStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64, _trace_so_far: &ExecutionTrace) -> bool {
        self.steps = 0;
        self.generator = ValueGenerator::new(self.base_seed.wrapping_add(iteration));
        true
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: OperationId,
        is_yielding: bool,
    ) -> StrategyResult<Option<OperationId>> {
        if enabled.is_empty() {
            return Ok(None);
        }
        self.steps += 1;

        let current_enabled = enabled.contains(&current);
        if current_enabled && !is_yielding && !self.preemption_wins() {
            return Ok(Some(current));
        }

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
        format!("probabilistic:{}", self.difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<OperationId> {
        raw.iter().copied().map(OperationId).collect()
    }

    #[test]
    fn test_mostly_keeps_the_running_operation() {
        let mut strategy = ProbabilisticStrategy::new(9, 4, 1_000_000);
        strategy.initialize_next_iteration(0, &ExecutionTrace::new());
        let enabled = ids(&[0, 1]);

        let kept = (0..1000)
            .filter(|_| {
                strategy
                    .next_operation(&enabled, OperationId(0), false)
                    .unwrap()
                    == Some(OperationId(0))
            })
            .count();
        // Preemption probability is 1/16; keeping far more than half is expected.
        assert!(kept > 800, "kept only {} of 1000", kept);
    }

    #[test]
    fn test_yield_forces_a_fresh_draw() {
        let mut strategy = ProbabilisticStrategy::new(9, 16, 1_000_000);
        strategy.initialize_next_iteration(0, &ExecutionTrace::new());
        let enabled = ids(&[0, 1]);

        let mut switched = false;
        for _ in 0..200 {
            if strategy
                .next_operation(&enabled, OperationId(0), true)
                .unwrap()
                == Some(OperationId(1))
            {
                switched = true;
                break;
            }
        }
        assert!(switched, "a yielding operation was never descheduled");
    }

    #[test]
    fn test_blocked_current_is_never_chosen() {
        let mut strategy = ProbabilisticStrategy::new(2, 3, 1000);
        strategy.initialize_next_iteration(0, &ExecutionTrace::new());
        // Current op 7 is not in the enabled set.
        let enabled = ids(&[1, 2]);
        for _ in 0..100 {
            let choice = strategy
                .next_operation(&enabled, OperationId(7), false)
                .unwrap()
                .unwrap();
            assert_ne!(choice, OperationId(7));
        }
    }
}
