//! Trace replay
//!
//! A replay strategy makes no decisions of its own: it reads a persisted
//! [`TraceFile`] and hands back exactly the decisions it recorded. Any
//! divergence between the trace and what the replayed execution observes
//! fails the iteration with a replay error, because divergence means the
//! program under test is not deterministic (or the trace belongs to a
//! different program).

use crate::error::{StrategyError, StrategyResult};
use crate::strategy::{ExplorationStrategy, OperationId};
use crate::trace::{Decision, ExecutionTrace, TraceFile};

/// Follows a persisted execution trace exactly; single iteration
#[derive(Debug)]
pub struct ReplayStrategy {
    decisions: Vec<Decision>,
    cursor: usize,
    steps: u64,
    consumed: bool,
}

impl ReplayStrategy {
    /// Replay the decisions of a persisted trace file
    pub fn from_file(file: TraceFile) -> Self {
        Self {
            decisions: file.decisions,
            cursor: 0,
            steps: 0,
            consumed: false,
        }
    }

    /// Replay an in-memory trace
    pub fn from_trace(trace: &ExecutionTrace) -> Self {
        Self {
            decisions: trace.decisions().to_vec(),
            cursor: 0,
            steps: 0,
            consumed: false,
        }
    }

    /// Next non-fingerprint decision, advancing the cursor
    fn next_decision(&mut self) -> Option<(usize, Decision)> {
        while let Some(&decision) = self.decisions.get(self.cursor) {
            let index = self.cursor;
            self.cursor += 1;
            if !matches!(decision, Decision::Hash { .. }) {
                return Some((index, decision));
            }
        }
        None
    }
}

impl ExplorationStrategy for ReplayStrategy {
    fn initialize_next_iteration(&mut self, _iteration: u64, _trace_so_far: &ExecutionTrace) -> bool {
        if self.consumed {
            return false;
        }
        self.consumed = true;
        self.cursor = 0;
        self.steps = 0;
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

        let (index, decision) = self
            .next_decision()
            .ok_or(StrategyError::ReplayExhausted {
                index: self.decisions.len(),
            })?;

        match decision {
            Decision::ScheduleOp { op } => {
                let id = OperationId(op);
                if enabled.contains(&id) {
                    Ok(Some(id))
                } else {
                    Err(StrategyError::ReplayDivergence {
                        index,
                        expected: format!("op {} enabled", op),
                        observed: format!(
                            "enabled set {:?}",
                            enabled.iter().map(|o| o.as_u64()).collect::<Vec<_>>()
                        ),
                    })
                }
            }
            other => Err(StrategyError::ReplayDivergence {
                index,
                expected: "a scheduling decision".to_string(),
                observed: other.to_string(),
            }),
        }
    }

    fn next_bool(&mut self) -> StrategyResult<bool> {
        let (index, decision) = self
            .next_decision()
            .ok_or(StrategyError::ReplayExhausted {
                index: self.decisions.len(),
            })?;
        match decision {
            Decision::Bool { value } => Ok(value),
            other => Err(StrategyError::ReplayDivergence {
                index,
                expected: "a boolean decision".to_string(),
                observed: other.to_string(),
            }),
        }
    }

    fn next_int(&mut self, bound: u32) -> StrategyResult<u32> {
        let (index, decision) = self
            .next_decision()
            .ok_or(StrategyError::ReplayExhausted {
                index: self.decisions.len(),
            })?;
        match decision {
            Decision::Int {
                value,
                bound: recorded_bound,
            } if recorded_bound == bound => Ok(value),
            other => Err(StrategyError::ReplayDivergence {
                index,
                expected: format!("an integer decision with bound {}", bound),
                observed: other.to_string(),
            }),
        }
    }

    fn step_count(&self) -> u64 {
        self.steps
    }

    fn has_reached_max_steps(&self) -> bool {
        false
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn description(&self) -> String {
        "replay".to_string()
    }
}
