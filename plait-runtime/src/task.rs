//! Controlled tasks
//!
//! A controlled task is the future-like handle for one spawned operation.
//! Task state lives in the scheduler's task table (status, owning
//! operation, awaiter set); the typed result travels through a slot shared
//! between the handle and the operation's backing thread. Once a task is
//! terminal it never mutates, and its awaiters are woken exactly once.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::Runtime;
use crate::scheduler::{Scheduler, WaitMode};

/// Identifier of a controlled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task({})", self.0)
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet terminal
    Pending,
    /// Completed normally with a result
    RanToCompletion,
    /// Completed by panic or error
    Faulted,
    /// Canceled before completing
    Canceled,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state
    pub fn is_terminal(self) -> bool {
        self != TaskStatus::Pending
    }
}

/// How a task failed, as observed by its awaiters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// The task panicked or returned an error
    Faulted {
        /// Captured message
        message: String,
    },
    /// The task was canceled
    Canceled,
}

/// Shared result slot between a task's handle and its backing thread
pub(crate) type ResultSlot<T> = Arc<Mutex<Option<Result<T, TaskFailure>>>>;

/// Handle to a controlled task with a typed result
///
/// Joining consumes the handle; the result of a task is observed exactly
/// once. Status queries are available without consuming.
pub struct TaskHandle<T> {
    id: TaskId,
    scheduler: Scheduler,
    slot: ResultSlot<T>,
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

// Manual impl: handles are cheap references to shared task state and can
// be cloned without `T: Clone`. The result itself is still observed at
// most once across all clones.
impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            scheduler: self.scheduler.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T: Send + 'static> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, scheduler: Scheduler, slot: ResultSlot<T>) -> Self {
        Self {
            id,
            scheduler,
            slot,
        }
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current task status
    pub fn status(&self) -> TaskStatus {
        self.scheduler.task_status(self.id)
    }

    /// Whether the task has reached a terminal state
    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    /// The failure of a terminal task, without consuming the handle
    pub fn peek_failure(&self) -> Option<TaskFailure> {
        match self.slot.lock().as_ref() {
            Some(Err(failure)) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Block the calling operation until the task is terminal, then take
    /// its result
    ///
    /// A terminal task joins immediately (the call is still a scheduling
    /// point). A faulted task surfaces [`RuntimeError::TaskFaulted`], a
    /// canceled one [`RuntimeError::TaskCanceled`]; neither unwinds across
    /// operations.
    pub fn join(self) -> RuntimeResult<T> {
        self.scheduler.wait_for_tasks(&[self.id], WaitMode::All)?;
        let outcome = self
            .slot
            .lock()
            .take()
            .ok_or_else(|| RuntimeError::Internal(format!("{} completed without a result", self.id)))?;
        match outcome {
            Ok(value) => Ok(value),
            Err(TaskFailure::Faulted { message }) => Err(RuntimeError::TaskFaulted { message }),
            Err(TaskFailure::Canceled) => Err(RuntimeError::TaskCanceled),
        }
    }

    /// Cancel the task if it is still pending
    ///
    /// Cancellation is cooperative: the backing operation keeps running
    /// until its next scheduling point, which fails with
    /// [`RuntimeError::TaskCanceled`] and unwinds it. Awaiters wake with a
    /// canceled result.
    pub fn cancel(&self) -> RuntimeResult<()> {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(Err(TaskFailure::Canceled));
        }
        drop(slot);
        self.scheduler.cancel_task(self.id)
    }
}

/// Combine tasks into one that completes when all of them are terminal
///
/// The combined task carries the results in input order. It is `Canceled`
/// if any input was canceled, `Faulted` if any input faulted (and none
/// was canceled).
pub fn when_all<T: Send + 'static>(
    rt: &Runtime,
    handles: Vec<TaskHandle<T>>,
) -> RuntimeResult<TaskHandle<Vec<T>>> {
    rt.spawn_named("when-all", move |inner| {
        let ids: Vec<TaskId> = handles.iter().map(TaskHandle::id).collect();
        inner.scheduler().wait_for_tasks(&ids, WaitMode::All)?;
        // Every input is terminal here. A canceled input cancels the
        // combination even when an earlier input faulted.
        if ids
            .iter()
            .any(|&id| inner.scheduler().task_status(id) == TaskStatus::Canceled)
        {
            return Err(RuntimeError::TaskCanceled);
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.join()?);
        }
        Ok(results)
    })
}

/// Combine tasks into one that completes when any of them is terminal
///
/// The combined task yields the input index of a terminal task (the
/// lowest such index at observation time).
pub fn when_any<T: Send + 'static>(
    rt: &Runtime,
    handles: &[TaskHandle<T>],
) -> RuntimeResult<TaskHandle<usize>> {
    let ids: Vec<TaskId> = handles.iter().map(TaskHandle::id).collect();
    rt.spawn_named("when-any", move |inner| {
        inner.scheduler().wait_for_tasks(&ids, WaitMode::Any)?;
        ids.iter()
            .position(|&id| inner.scheduler().task_status(id).is_terminal())
            .ok_or_else(|| {
                RuntimeError::Internal("wait-any returned with no terminal task".to_string())
            })
    })
}
