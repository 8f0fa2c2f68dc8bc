//! Priority-based probabilistic concurrency testing (PCT)
//!
//! PCT keeps a total priority order over operations. Each new operation is
//! inserted at a random position; at every scheduling point the
//! highest-priority enabled operation runs. At `k - 1` randomly drawn
//! change points the running operation is demoted below every other
//! active operation. For a program with `n` steps and a bug of depth `d`,
//! PCT finds the bug with probability at least `1/(n * k^(d-1))`.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::StrategyResult;
use crate::rng::ValueGenerator;
use crate::strategy::{ExplorationStrategy, OperationId};
use crate::trace::ExecutionTrace;

/// Priority-based exploration; unfair by design
#[derive(Debug)]
pub struct PctStrategy {
    base_seed: u64,
    generator: ValueGenerator,
    change_points: u32,
    steps: u64,
    max_steps: u64,
    /// Total priority order, index 0 is the highest priority
    priorities: Vec<OperationId>,
    /// Steps at which the running operation is demoted
    demotion_points: BTreeSet<u64>,
}

impl PctStrategy {
    /// Create a PCT strategy with `change_points` priority change points
    /// drawn over a step horizon of `max_steps`
    pub fn new(base_seed: u64, change_points: u32, max_steps: u64) -> Self {
        Self {
            base_seed,
            generator: ValueGenerator::new(base_seed),
            change_points: change_points.max(1),
            steps: 0,
            max_steps,
            priorities: Vec::new(),
            demotion_points: BTreeSet::new(),
        }
    }

    /// Insert operations seen for the first time at random priorities
    fn register_new_operations(&mut self, enabled: &[OperationId]) {
        for &op in enabled {
            if !self.priorities.contains(&op) {
                let position = self.generator.next_int(self.priorities.len() as u32 + 1) as usize;
                self.priorities.insert(position, op);
            }
        }
    }

    fn demote(&mut self, op: OperationId) {
        if let Some(position) = self.priorities.iter().position(|&p| p == op) {
            self.priorities.remove(position);
            self.priorities.push(op);
            debug!(op = op.as_u64(), step = self.steps, "pct demotion");
        }
    }
}

impl ExplorationStrategy for PctStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64, _trace_so_far: &ExecutionTrace) -> bool {
        self.steps = 0;
        self.priorities.clear();
        self.demotion_points.clear();
        self.generator = ValueGenerator::new(self.base_seed.wrapping_add(iteration));

        // Draw k - 1 priority change points uniformly over the horizon.
        let horizon = self.max_steps.min(u64::from(u32::MAX)) as u32;
        for _ in 0..self.change_points.saturating_sub(1) {
            self.demotion_points
                .insert(u64::from(self.generator.next_int(horizon)));
        }
        true
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: OperationId,
        _is_yielding: bool,
    ) -> StrategyResult<Option<OperationId>> {
        if enabled.is_empty() {
            return Ok(None);
        }

        self.register_new_operations(enabled);
        self.steps += 1;

        if self.demotion_points.contains(&self.steps) {
            self.demote(current);
        }

        // Highest-priority enabled operation wins. The priority list is a
        // total order, and `enabled` arrives sorted by id, so insertion and
        // lookup are both deterministic.
        let choice = self
            .priorities
            .iter()
            .copied()
            .find(|op| enabled.contains(op));
        Ok(choice.or_else(|| enabled.first().copied()))
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
        false
    }

    fn description(&self) -> String {
        format!("pct:{}", self.change_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<OperationId> {
        raw.iter().copied().map(OperationId).collect()
    }

    #[test]
    fn test_highest_priority_operation_runs_until_demoted() {
        let mut strategy = PctStrategy::new(5, 1, 10_000);
        strategy.initialize_next_iteration(0, &ExecutionTrace::new());
        let enabled = ids(&[0, 1, 2]);

        // With one change point requested, no demotions are drawn (k - 1 = 0),
        // so the same operation must win every decision.
        let first = strategy
            .next_operation(&enabled, OperationId(0), false)
            .unwrap()
            .unwrap();
        for _ in 0..50 {
            let again = strategy
                .next_operation(&enabled, first, false)
                .unwrap()
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_demotion_lets_another_operation_run() {
        let mut strategy = PctStrategy::new(5, 1, 10_000);
        strategy.initialize_next_iteration(0, &ExecutionTrace::new());
        let enabled = ids(&[0, 1]);

        let winner = strategy
            .next_operation(&enabled, OperationId(0), false)
            .unwrap()
            .unwrap();
        strategy.demote(winner);
        let successor = strategy
            .next_operation(&enabled, winner, false)
            .unwrap()
            .unwrap();
        assert_ne!(successor, winner);
    }

    #[test]
    fn test_blocked_high_priority_operation_is_skipped() {
        let mut strategy = PctStrategy::new(5, 1, 10_000);
        strategy.initialize_next_iteration(0, &ExecutionTrace::new());

        // Register both, then present only one as enabled.
        strategy
            .next_operation(&ids(&[0, 1]), OperationId(0), false)
            .unwrap();
        let choice = strategy
            .next_operation(&ids(&[1]), OperationId(0), false)
            .unwrap()
            .unwrap();
        assert_eq!(choice, OperationId(1));
    }

    #[test]
    fn test_iterations_draw_fresh_change_points() {
        let mut strategy = PctStrategy::new(5, 8, 1000);
        strategy.initialize_next_iteration(0, &ExecutionTrace::new());
        let first = strategy.demotion_points.clone();
        strategy.initialize_next_iteration(1, &ExecutionTrace::new());
        let second = strategy.demotion_points.clone();
        // Not a hard guarantee for every seed pair, but for this seed the
        // draws differ; equality would indicate the generator was not reseeded.
        assert_ne!(first, second);
    }

    #[test]
    fn test_determinism_across_identical_runs() {
        let enabled = ids(&[0, 1, 2, 3]);
        let run = |seed: u64| {
            let mut strategy = PctStrategy::new(seed, 4, 1000);
            strategy.initialize_next_iteration(2, &ExecutionTrace::new());
            let mut current = OperationId(0);
            let mut choices = Vec::new();
            for _ in 0..64 {
                current = strategy
                    .next_operation(&enabled, current, false)
                    .unwrap()
                    .unwrap();
                choices.push(current);
            }
            choices
        };
        assert_eq!(run(77), run(77));
    }
}
