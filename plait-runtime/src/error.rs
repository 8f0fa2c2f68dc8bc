//! Error types for the controlled runtime

use thiserror::Error;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Error types surfaced to code running under the scheduler
///
/// `IterationStopped` and `TaskCanceled` are unwinding signals, not bugs:
/// they make a parked or running operation return through its frames so
/// the backing thread can exit once the iteration is over. Operations must
/// propagate them with `?` rather than swallow them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The iteration was stopped (bug found, canceled, or finished) while
    /// this operation was still running
    #[error("iteration stopped")]
    IterationStopped,

    /// The task backing this operation was canceled
    #[error("task canceled")]
    TaskCanceled,

    /// A joined task completed by fault
    #[error("task faulted: {message}")]
    TaskFaulted {
        /// Captured failure message
        message: String,
    },

    /// A test assertion failed; the failure has been reported as a bug
    #[error("assertion failed: {message}")]
    AssertionFailed {
        /// The assertion message
        message: String,
    },

    /// A scheduling point was reached from a thread the scheduler does
    /// not control
    #[error("uncontrolled concurrency: {evidence}")]
    UncontrolledConcurrency {
        /// What the scheduler observed
        evidence: String,
    },

    /// An operation status transition that the state machine forbids
    #[error("invalid operation transition from {from} to {to}")]
    InvalidTransition {
        /// Status the operation was in
        from: String,
        /// Status the caller tried to move it to
        to: String,
    },

    /// A synchronization primitive was used against its protocol, e.g.
    /// releasing a lock the caller does not hold
    #[error("resource misuse: {0}")]
    ResourceMisuse(String),

    /// A scheduler invariant was violated; always fatal
    #[error("internal scheduler error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether this error is an unwinding signal rather than a bug in its
    /// own right
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            RuntimeError::IterationStopped | RuntimeError::TaskCanceled
        )
    }
}
