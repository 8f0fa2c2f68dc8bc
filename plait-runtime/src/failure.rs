//! Iteration outcome taxonomy
//!
//! A [`Failure`] is a bug the engine found; an [`IterationOutcome`] is how
//! one iteration ended. The first failure reported in an iteration wins;
//! everything after it is unwinding noise.

use serde::{Deserialize, Serialize};

/// One operation stuck at iteration end, with the reason it cannot run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedOperation {
    /// Operation id
    pub id: u64,
    /// Operation name
    pub name: String,
    /// Human-readable description of what it is blocked on
    pub reason: String,
}

/// A bug found during one iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Failure {
    /// A test assertion or monitor safety condition failed
    AssertionFailure {
        /// The assertion message
        message: String,
    },

    /// A panic in user code, captured at the operation's top frame
    UnhandledException {
        /// Classification of the exception, e.g. `panic`
        exception: String,
        /// Captured message
        message: String,
        /// Captured backtrace, when available
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backtrace: Option<String>,
    },

    /// No operation can run and at least one is blocked
    Deadlock {
        /// Every blocked operation with its reason
        blocked: Vec<BlockedOperation>,
    },

    /// A liveness monitor was still in a hot state when the iteration
    /// ended or the step bound was exhausted
    LivenessViolation {
        /// Monitor name
        monitor: String,
        /// The hot state it was stuck in
        hot_state: String,
    },

    /// A scheduling point ran on a thread the scheduler does not control
    UncontrolledConcurrency {
        /// What the scheduler observed
        evidence: String,
    },

    /// A replayed execution diverged from its trace
    TraceReplayFailure {
        /// Index of the diverging decision
        index: usize,
        /// What the trace recorded
        expected: String,
        /// What the execution observed
        observed: String,
    },
}

impl Failure {
    /// Short classification tag used in reports and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::AssertionFailure { .. } => "assertion-failure",
            Failure::UnhandledException { .. } => "unhandled-exception",
            Failure::Deadlock { .. } => "deadlock",
            Failure::LivenessViolation { .. } => "liveness-violation",
            Failure::UncontrolledConcurrency { .. } => "uncontrolled-concurrency",
            Failure::TraceReplayFailure { .. } => "trace-replay-failure",
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::AssertionFailure { message } => write!(f, "assertion failed: {}", message),
            Failure::UnhandledException {
                exception, message, ..
            } => write!(f, "unhandled {}: {}", exception, message),
            Failure::Deadlock { blocked } => {
                write!(f, "deadlock among {} operation(s): ", blocked.len())?;
                for (i, op) in blocked.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{} ({}) {}", op.name, op.id, op.reason)?;
                }
                Ok(())
            }
            Failure::LivenessViolation { monitor, hot_state } => {
                write!(f, "monitor {} stuck in hot state {}", monitor, hot_state)
            }
            Failure::UncontrolledConcurrency { evidence } => {
                write!(f, "uncontrolled concurrency: {}", evidence)
            }
            Failure::TraceReplayFailure {
                index,
                expected,
                observed,
            } => write!(
                f,
                "replay diverged at decision {}: expected {}, observed {}",
                index, expected, observed
            ),
        }
    }
}

/// How one iteration ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    /// Every operation completed and no monitor was hot
    Ok,
    /// The step bound was exhausted without finding a bug; a hint, not a
    /// bug in itself
    MaxStepsReached,
    /// A bug was found
    Failed(Failure),
}

impl IterationOutcome {
    /// The failure, when the iteration found one
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            IterationOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether the iteration found a bug
    pub fn is_bug(&self) -> bool {
        matches!(self, IterationOutcome::Failed(_))
    }
}
