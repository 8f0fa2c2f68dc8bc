//! Bounded depth-first enumeration of the decision tree
//!
//! Every decision point (scheduling choice, boolean draw, integer draw) is
//! a node in the tree; the branch taken at each node is remembered across
//! iterations. Each new iteration advances the deepest incrementable
//! branch, so the strategy walks the whole tree up to `max_depth` and then
//! halts exploration. Decisions past the depth bound always take branch 0.

use crate::error::StrategyResult;
use crate::strategy::{ExplorationStrategy, OperationId};
use crate::trace::ExecutionTrace;

#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Branch taken at this node
    index: u32,
    /// Number of branches observed at this node
    arity: u32,
}

/// Systematic bounded DFS; deterministic and seedless
#[derive(Debug)]
pub struct DfsBoundedStrategy {
    stack: Vec<Frame>,
    /// Position within the stack during the current iteration
    cursor: usize,
    max_depth: usize,
    steps: u64,
    max_steps: u64,
}

impl DfsBoundedStrategy {
    /// Create a DFS strategy bounded at `max_depth` decisions
    pub fn new(max_depth: u32, max_steps: u64) -> Self {
        Self {
            stack: Vec::new(),
            cursor: 0,
            max_depth: max_depth as usize,
            steps: 0,
            max_steps,
        }
    }

    /// Take the branch recorded for the current node, or open a new node
    fn next_choice(&mut self, arity: u32) -> u32 {
        debug_assert!(arity >= 1);
        if self.cursor >= self.max_depth {
            // Beyond the bound the walk is deterministic rail: branch 0.
            self.cursor += 1;
            return 0;
        }

        if self.cursor == self.stack.len() {
            self.stack.push(Frame { index: 0, arity });
        }

        let frame = &mut self.stack[self.cursor];
        // A deterministic program reproduces the same arity along an
        // identical prefix; clamp defensively if it does not.
        frame.arity = arity;
        let choice = frame.index.min(arity - 1);
        self.cursor += 1;
        choice
    }
}

impl ExplorationStrategy for DfsBoundedStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64, _trace_so_far: &ExecutionTrace) -> bool {
        self.steps = 0;
        self.cursor = 0;
        if iteration == 0 {
            return true;
        }

        // Backtrack: drop fully-explored suffix nodes, then advance the
        // deepest node that still has an untaken branch.
        while let Some(last) = self.stack.last() {
            if last.index + 1 >= last.arity {
                self.stack.pop();
            } else {
                break;
            }
        }
        match self.stack.last_mut() {
            Some(frame) => {
                frame.index += 1;
                true
            }
            None => false,
        }
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
        let index = self.next_choice(enabled.len() as u32) as usize;
        Ok(Some(enabled[index]))
    }

    fn next_bool(&mut self) -> StrategyResult<bool> {
        Ok(self.next_choice(2) == 1)
    }

    fn next_int(&mut self, bound: u32) -> StrategyResult<u32> {
        Ok(self.next_choice(bound.max(1)))
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
        format!("dfs-bounded:{}", self.max_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<OperationId> {
        raw.iter().copied().map(OperationId).collect()
    }

    /// Run one iteration of a synthetic program with `depth` binary
    /// scheduling decisions and collect the chosen branch indices.
    fn run_iteration(strategy: &mut DfsBoundedStrategy, depth: usize) -> Vec<u64> {
        let enabled = ids(&[0, 1]);
        (0..depth)
            .map(|_| {
                strategy
                    .next_operation(&enabled, OperationId(0), false)
                    .unwrap()
                    .unwrap()
                    .as_u64()
            })
            .collect()
    }

    #[test]
    fn test_enumerates_the_full_binary_tree() {
        let mut strategy = DfsBoundedStrategy::new(3, 1000);
        let trace = ExecutionTrace::new();

        let mut schedules = Vec::new();
        let mut iteration = 0;
        while strategy.initialize_next_iteration(iteration, &trace) {
            schedules.push(run_iteration(&mut strategy, 3));
            iteration += 1;
        }

        // 2^3 distinct schedules, first all-zeros, last all-ones.
        assert_eq!(schedules.len(), 8);
        assert_eq!(schedules.first().unwrap(), &vec![0, 0, 0]);
        assert_eq!(schedules.last().unwrap(), &vec![1, 1, 1]);
        let unique: std::collections::BTreeSet<_> = schedules.iter().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn test_depth_bound_truncates_the_tree() {
        let mut strategy = DfsBoundedStrategy::new(2, 1000);
        let trace = ExecutionTrace::new();

        let mut count = 0;
        let mut iteration = 0;
        while strategy.initialize_next_iteration(iteration, &trace) {
            // The program makes 4 decisions but only 2 are explored.
            run_iteration(&mut strategy, 4);
            iteration += 1;
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn test_bool_and_int_choices_are_tree_nodes() {
        let mut strategy = DfsBoundedStrategy::new(2, 1000);
        let trace = ExecutionTrace::new();

        let mut outcomes = Vec::new();
        let mut iteration = 0;
        while strategy.initialize_next_iteration(iteration, &trace) {
            let b = strategy.next_bool().unwrap();
            let i = strategy.next_int(3).unwrap();
            outcomes.push((b, i));
            iteration += 1;
        }

        assert_eq!(outcomes.len(), 6);
        assert_eq!(outcomes[0], (false, 0));
        assert_eq!(outcomes[5], (true, 2));
    }
}
