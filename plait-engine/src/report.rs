//! Test reports
//!
//! A [`TestReport`] summarizes one run: iterations driven, bugs found,
//! and for every bug both a replayable JSON trace and a human-readable
//! rendering of the schedule that produced it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use plait_runtime::{Failure, OperationStatus};
use plait_strategies::{Decision, ExecutionTrace};

/// One bug with everything needed to reproduce it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugReport {
    /// Iteration the bug was found in
    pub iteration: u64,
    /// Seed of that iteration
    pub seed: u64,
    /// The bug
    pub failure: Failure,
    /// Replayable trace in the JSON wire format
    pub trace_json: String,
    /// Human-readable schedule rendering
    pub readable_trace: String,
}

/// Aggregate scheduling statistics across iterations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Scheduling decisions across all iterations
    pub total_decisions: u64,
    /// Operations created across all iterations
    pub total_operations: u64,
    /// Largest runnable set ever observed
    pub max_concurrency: u64,
}

/// Summary of a whole test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Strategy description, e.g. `fair-pct:pct:10`
    pub strategy: String,
    /// Base seed of the run
    pub seed: u64,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub elapsed_ms: u64,
    /// Iterations driven
    pub iterations: u64,
    /// Bugs found (more than one only in exhaustive mode)
    pub bugs: Vec<BugReport>,
    /// Whether any iteration exhausted its step budget without a bug
    pub max_steps_hint: bool,
    /// Aggregate statistics
    pub stats: RunStats,
}

impl TestReport {
    /// Whether the run found at least one bug
    pub fn found_bug(&self) -> bool {
        !self.bugs.is_empty()
    }

    /// Process exit code: 0 no bug, 1 bug found
    pub fn exit_code(&self) -> i32 {
        i32::from(self.found_bug())
    }

    /// Serialize the report as pretty JSON for report files
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One-paragraph human summary
    pub fn summary(&self) -> String {
        let verdict = match self.bugs.first() {
            Some(bug) => format!("found {} ({})", bug.failure.kind(), bug.failure),
            None if self.max_steps_hint => {
                "no bug found (some iterations exhausted their step budget)".to_string()
            }
            None => "no bug found".to_string(),
        };
        format!(
            "run {}: {} iteration(s) with {} in {} ms; {}",
            self.run_id, self.iterations, self.strategy, self.elapsed_ms, verdict
        )
    }
}

/// Render a trace as human-readable lines, one per decision
pub fn render_readable(
    operations: &[(u64, String, OperationStatus)],
    trace: &ExecutionTrace,
) -> String {
    let names: BTreeMap<u64, &str> = operations
        .iter()
        .map(|(id, name, _)| (*id, name.as_str()))
        .collect();

    let mut out = String::new();
    let mut step = 0u64;
    for decision in trace.decisions() {
        match decision {
            Decision::ScheduleOp { op } => {
                step += 1;
                let name = names.get(op).copied().unwrap_or("?");
                out.push_str(&format!("step {:>4}: schedule op({}) {}\n", step, op, name));
            }
            Decision::Bool { value } => {
                out.push_str(&format!("           choice: bool = {}\n", value));
            }
            Decision::Int { value, bound } => {
                out.push_str(&format!(
                    "           choice: int = {} (bound {})\n",
                    value, bound
                ));
            }
            Decision::Hash { fingerprint } => {
                out.push_str(&format!("           state: {:#018x}\n", fingerprint));
            }
        }
    }
    for (id, name, status) in operations {
        out.push_str(&format!("final: op({}) {} -> {}\n", id, name, status));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use plait_strategies::OperationId;

    #[test]
    fn test_readable_rendering_names_operations() {
        let mut trace = ExecutionTrace::new();
        trace.record_scheduled(OperationId(0));
        trace.record_bool(true);
        trace.record_scheduled(OperationId(1));

        let operations = vec![
            (0, "root".to_string(), OperationStatus::Completed),
            (1, "worker".to_string(), OperationStatus::Completed),
        ];
        let rendered = render_readable(&operations, &trace);

        assert!(rendered.contains("step    1: schedule op(0) root"));
        assert!(rendered.contains("choice: bool = true"));
        assert!(rendered.contains("schedule op(1) worker"));
        assert!(rendered.contains("final: op(1) worker -> completed"));
    }

    #[test]
    fn test_report_exit_codes_and_summary() {
        let mut report = TestReport {
            run_id: Uuid::nil(),
            strategy: "random".to_string(),
            seed: 0,
            started_at: Utc::now(),
            elapsed_ms: 12,
            iterations: 3,
            bugs: Vec::new(),
            max_steps_hint: false,
            stats: RunStats::default(),
        };
        assert_eq!(report.exit_code(), 0);
        assert!(report.summary().contains("no bug found"));

        report.bugs.push(BugReport {
            iteration: 2,
            seed: 2,
            failure: Failure::AssertionFailure {
                message: "boom".to_string(),
            },
            trace_json: "{}".to_string(),
            readable_trace: String::new(),
        });
        assert_eq!(report.exit_code(), 1);
        assert!(report.summary().contains("assertion-failure"));
    }
}
