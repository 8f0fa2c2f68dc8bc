//! Controlled concurrency runtime for systematic testing
//!
//! This crate owns the core discipline of the engine: every concurrent
//! operation of a test runs on its own OS thread, but exactly one of them
//! executes at any instant, chosen by a pluggable exploration strategy at
//! explicit scheduling points. Suspension and waking go through the
//! [`Scheduler`]; the controlled primitives in [`sync`] and the task
//! layer in [`task`] never touch OS synchronization to coordinate
//! operations with each other.
//!
//! The [`Runtime`] handle is the stable API rewritten test code targets:
//! `spawn`, `delay`, `yield_now`, `choose_bool`/`choose_int`, `assert`,
//! and the controlled primitives built on top of it.

pub mod error;
pub mod failure;
pub mod operation;
pub mod runtime;
pub mod scheduler;
pub mod sync;
pub mod task;

pub use error::{RuntimeError, RuntimeResult};
pub use failure::{BlockedOperation, Failure, IterationOutcome};
pub use operation::{Operation, OperationId, OperationStatus, ResourceId};
pub use runtime::{Runtime, RewrittenMarker, REWRITER_PROTOCOL_VERSION};
pub use scheduler::{
    FingerprintSource, LivenessProbe, SchedulePoint, Scheduler, SchedulerSettings,
    SchedulerStats, SharedStrategy, WaitMode,
};
pub use sync::{Lock, ManualResetEvent, Monitor, RwLock, Semaphore};
pub use task::{when_all, when_any, TaskFailure, TaskHandle, TaskId, TaskStatus};
