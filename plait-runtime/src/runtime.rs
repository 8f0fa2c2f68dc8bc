//! The controlled runtime handle
//!
//! [`Runtime`] is the stable surface rewritten test code targets: spawn,
//! delay, yield, nondeterministic choices, and assertions. Every method is
//! a scheduling point or runs entirely under the scheduler lock, so no
//! uncontrolled concurrency can leak through it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::failure::Failure;
use crate::operation::OperationId;
use crate::scheduler::{SchedulePoint, Scheduler};
use crate::task::{ResultSlot, TaskFailure, TaskHandle, TaskStatus};

/// Protocol version expected from rewritten artifacts
pub const REWRITER_PROTOCOL_VERSION: u32 = 1;

/// Marker a rewritten artifact carries so the engine can tell controlled
/// code from raw code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewrittenMarker {
    /// Rewriter protocol version the artifact was produced with
    pub version: u32,
}

impl RewrittenMarker {
    /// Marker for the current protocol version
    pub fn current() -> Self {
        Self {
            version: REWRITER_PROTOCOL_VERSION,
        }
    }

    /// Whether the engine understands this artifact
    pub fn is_compatible(&self) -> bool {
        self.version == REWRITER_PROTOCOL_VERSION
    }
}

/// Handle to the controlled runtime; cheap to clone
#[derive(Clone)]
pub struct Runtime {
    scheduler: Scheduler,
}

impl Runtime {
    /// Wrap a scheduler in the rewriter-facing API
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// The underlying scheduler
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Spawn a controlled task
    ///
    /// The closure runs as a fresh operation on its own backing thread,
    /// which stays parked until the strategy schedules it. Spawning from a
    /// controlled operation is itself a scheduling point, so the child may
    /// run before the parent continues.
    pub fn spawn<T, F>(&self, f: F) -> RuntimeResult<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Runtime) -> RuntimeResult<T> + Send + 'static,
    {
        self.spawn_named("task", f)
    }

    /// Spawn a controlled task with a stable name for traces and reports
    pub fn spawn_named<T, F>(&self, name: &str, f: F) -> RuntimeResult<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Runtime) -> RuntimeResult<T> + Send + 'static,
    {
        let scheduler = self.scheduler.clone();
        let controlled_caller = scheduler.is_controlled_thread();
        let parent = if controlled_caller {
            scheduler.current_operation().ok()
        } else {
            None
        };

        let (op_id, task_id) = scheduler.register_spawn(name, parent)?;
        let slot: ResultSlot<T> = Arc::new(Mutex::new(None));

        let runner_slot = slot.clone();
        let runner_scheduler = scheduler.clone();
        let handle = thread::Builder::new()
            .name(format!("plait-op-{}", op_id.as_u64()))
            .spawn(move || run_operation(runner_scheduler, op_id, task_id, runner_slot, f))
            .map_err(|e| RuntimeError::Internal(format!("failed to spawn backing thread: {}", e)))?;
        scheduler.track_thread(handle);

        if controlled_caller {
            scheduler.scheduling_point(SchedulePoint::Create)?;
        }
        Ok(TaskHandle::new(task_id, scheduler, slot))
    }

    /// A controlled delay: completes once its backing operation is next
    /// scheduled
    ///
    /// Delays are interleaving points, not wall time; the engine explores
    /// orderings instead of waiting.
    pub fn delay(&self, _millis: u64) -> RuntimeResult<TaskHandle<()>> {
        self.spawn_named("delay", |rt| rt.yield_now())
    }

    /// Explicitly yield the schedule; strategies treat this as a hint to
    /// deprioritize the caller
    pub fn yield_now(&self) -> RuntimeResult<()> {
        self.scheduler.scheduling_point(SchedulePoint::Yield)
    }

    /// A nondeterministic boolean resolved by the exploration strategy
    pub fn choose_bool(&self) -> RuntimeResult<bool> {
        let value = self.scheduler.next_bool()?;
        self.scheduler.scheduling_point(SchedulePoint::Choice)?;
        Ok(value)
    }

    /// A nondeterministic integer in `[0, bound)` resolved by the
    /// exploration strategy
    pub fn choose_int(&self, bound: u32) -> RuntimeResult<u32> {
        let value = self.scheduler.next_int(bound)?;
        self.scheduler.scheduling_point(SchedulePoint::Choice)?;
        Ok(value)
    }

    /// Test assertion: failure is reported as a bug and stops the
    /// iteration
    pub fn assert(&self, condition: bool, message: impl Into<String>) -> RuntimeResult<()> {
        if condition {
            return Ok(());
        }
        let message = message.into();
        self.scheduler.report_failure(Failure::AssertionFailure {
            message: message.clone(),
        });
        Err(RuntimeError::AssertionFailed { message })
    }

    /// The calling operation's id
    pub fn current_operation(&self) -> RuntimeResult<OperationId> {
        self.scheduler.current_operation()
    }
}

/// Body of every backing thread: park until scheduled, run the closure,
/// capture panics, seal the task, and hand the schedule on.
fn run_operation<T, F>(
    scheduler: Scheduler,
    op_id: OperationId,
    task_id: crate::task::TaskId,
    slot: ResultSlot<T>,
    f: F,
) where
    T: Send + 'static,
    F: FnOnce(&Runtime) -> RuntimeResult<T> + Send + 'static,
{
    if let Err(e) = scheduler.start_operation(op_id) {
        debug!(op = op_id.as_u64(), error = %e, "operation canceled before start");
        set_if_empty(&slot, Err(TaskFailure::Canceled));
        scheduler.finish_operation(op_id, task_id, TaskStatus::Canceled);
        return;
    }

    let runtime = Runtime::new(scheduler.clone());
    let outcome = catch_unwind(AssertUnwindSafe(|| f(&runtime)));

    let status = match outcome {
        Ok(Ok(value)) => {
            set_if_empty(&slot, Ok(value));
            TaskStatus::RanToCompletion
        }
        Ok(Err(error)) if error.is_cancellation() => {
            set_if_empty(&slot, Err(TaskFailure::Canceled));
            TaskStatus::Canceled
        }
        Ok(Err(error)) => {
            set_if_empty(
                &slot,
                Err(TaskFailure::Faulted {
                    message: error.to_string(),
                }),
            );
            TaskStatus::Faulted
        }
        Err(panic) => {
            let message = panic_message(panic);
            // A panic in user code is a bug in its own right, captured at
            // the operation's top frame; it never unwinds across
            // operations.
            scheduler.report_failure(Failure::UnhandledException {
                exception: "panic".to_string(),
                message: message.clone(),
                backtrace: None,
            });
            set_if_empty(&slot, Err(TaskFailure::Faulted { message }));
            TaskStatus::Faulted
        }
    };
    scheduler.finish_operation(op_id, task_id, status);
}

fn set_if_empty<T>(slot: &ResultSlot<T>, value: Result<T, TaskFailure>) {
    let mut guard = slot.lock();
    if guard.is_none() {
        *guard = Some(value);
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic of unknown type".to_string()
    }
}
