//! Operations: the unit of scheduling
//!
//! An operation is one logical thread of control within a test iteration.
//! Its status machine is driven exclusively by the scheduler and by the
//! controlled primitives; user code never touches it directly.
//!
//! Status semantics:
//! - `Enabled` is the operation currently holding the schedule. At most
//!   one operation is `Enabled` at any instant; this is the engine's core
//!   invariant.
//! - `Paused` operations are runnable but descheduled. A woken operation
//!   re-enters the runnable pool as `Paused`, and exactly one `Paused`
//!   operation is promoted to `Enabled` per scheduling decision.
//! - `Completed` is terminal; a completed operation is never re-enabled.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};
use crate::task::TaskId;

pub use plait_strategies::OperationId;

/// Identifier for a resource operations can block on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "resource({})", self.0)
    }
}

/// Operation execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Registered but not yet runnable
    Created,
    /// Holding the schedule and executing user code
    Enabled,
    /// Runnable but descheduled
    Paused,
    /// Waiting for every task in its wait set to reach a terminal state
    BlockedOnWaitAll,
    /// Waiting for any task in its wait set to reach a terminal state
    BlockedOnWaitAny,
    /// Waiting for a matching event to arrive in a mailbox
    BlockedOnReceive,
    /// Waiting in a resource's FIFO queue
    BlockedOnResource,
    /// Terminal; never re-enabled
    Completed,
}

impl OperationStatus {
    /// Whether the operation can be handed the schedule
    pub fn is_runnable(self) -> bool {
        matches!(self, OperationStatus::Enabled | OperationStatus::Paused)
    }

    /// Whether the operation is waiting on some wake condition
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            OperationStatus::BlockedOnWaitAll
                | OperationStatus::BlockedOnWaitAny
                | OperationStatus::BlockedOnReceive
                | OperationStatus::BlockedOnResource
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationStatus::Created => "created",
            OperationStatus::Enabled => "enabled",
            OperationStatus::Paused => "paused",
            OperationStatus::BlockedOnWaitAll => "blocked-on-wait-all",
            OperationStatus::BlockedOnWaitAny => "blocked-on-wait-any",
            OperationStatus::BlockedOnReceive => "blocked-on-receive",
            OperationStatus::BlockedOnResource => "blocked-on-resource",
            OperationStatus::Completed => "completed",
        };
        write!(f, "{}", name)
    }
}

/// One logical thread of control within an iteration
#[derive(Debug)]
pub struct Operation {
    id: OperationId,
    name: String,
    status: OperationStatus,
    /// Tasks this operation is waiting on (wait-all or wait-any)
    waiting_tasks: BTreeSet<TaskId>,
    /// Resource this operation is queued on, when blocked on one
    blocked_resource: Option<ResourceId>,
    /// The operation that spawned this one, if any
    parent: Option<OperationId>,
}

impl Operation {
    /// Create an operation in the `Created` state
    pub fn new(id: OperationId, name: impl Into<String>, parent: Option<OperationId>) -> Self {
        Self {
            id,
            name: name.into(),
            status: OperationStatus::Created,
            waiting_tasks: BTreeSet::new(),
            blocked_resource: None,
            parent,
        }
    }

    /// Operation id
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Stable name for reports and logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// The spawning operation, if any
    pub fn parent(&self) -> Option<OperationId> {
        self.parent
    }

    /// Tasks this operation currently waits on
    pub fn waiting_tasks(&self) -> &BTreeSet<TaskId> {
        &self.waiting_tasks
    }

    /// Resource this operation is queued on, when blocked on one
    pub fn blocked_resource(&self) -> Option<ResourceId> {
        self.blocked_resource
    }

    fn invalid(&self, to: &str) -> RuntimeError {
        RuntimeError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// `Created -> Enabled` or `Created -> Paused` on registration;
    /// the first operation of an iteration activates straight to `Enabled`
    pub fn activate(&mut self, run_immediately: bool) -> RuntimeResult<()> {
        if self.status != OperationStatus::Created {
            return Err(self.invalid("enabled"));
        }
        self.status = if run_immediately {
            OperationStatus::Enabled
        } else {
            OperationStatus::Paused
        };
        Ok(())
    }

    /// `Paused -> Enabled`: hand this operation the schedule
    pub fn schedule(&mut self) -> RuntimeResult<()> {
        if self.status != OperationStatus::Paused {
            return Err(self.invalid("enabled"));
        }
        self.status = OperationStatus::Enabled;
        Ok(())
    }

    /// `Enabled -> Paused`: the operation yields the schedule
    pub fn deschedule(&mut self) -> RuntimeResult<()> {
        if self.status != OperationStatus::Enabled {
            return Err(self.invalid("paused"));
        }
        self.status = OperationStatus::Paused;
        Ok(())
    }

    /// `Enabled -> BlockedOnWaitAll/Any`: wait on a set of tasks
    pub fn block_on_tasks(&mut self, tasks: BTreeSet<TaskId>, any: bool) -> RuntimeResult<()> {
        if self.status != OperationStatus::Enabled {
            return Err(self.invalid("blocked-on-tasks"));
        }
        self.status = if any {
            OperationStatus::BlockedOnWaitAny
        } else {
            OperationStatus::BlockedOnWaitAll
        };
        self.waiting_tasks = tasks;
        Ok(())
    }

    /// `Enabled -> BlockedOnResource`: queue on a resource
    pub fn block_on_resource(&mut self, resource: ResourceId) -> RuntimeResult<()> {
        if self.status != OperationStatus::Enabled {
            return Err(self.invalid("blocked-on-resource"));
        }
        self.status = OperationStatus::BlockedOnResource;
        self.blocked_resource = Some(resource);
        Ok(())
    }

    /// `Enabled -> BlockedOnReceive`: wait for a mailbox event
    pub fn block_on_receive(&mut self) -> RuntimeResult<()> {
        if self.status != OperationStatus::Enabled {
            return Err(self.invalid("blocked-on-receive"));
        }
        self.status = OperationStatus::BlockedOnReceive;
        Ok(())
    }

    /// Remove one task from the wait set; returns true when the wake
    /// condition is now satisfied (conjunction for wait-all, disjunction
    /// for wait-any)
    pub fn task_completed(&mut self, task: TaskId) -> bool {
        if !self.waiting_tasks.remove(&task) {
            return false;
        }
        match self.status {
            OperationStatus::BlockedOnWaitAll => self.waiting_tasks.is_empty(),
            OperationStatus::BlockedOnWaitAny => true,
            _ => false,
        }
    }

    /// Repoint a resource-blocked operation at another resource FIFO
    /// without waking it (monitor pulse moves waiters to the acquire
    /// queue)
    pub fn requeue_resource(&mut self, to: ResourceId) -> RuntimeResult<()> {
        if self.status != OperationStatus::BlockedOnResource {
            return Err(self.invalid("blocked-on-resource"));
        }
        self.blocked_resource = Some(to);
        Ok(())
    }

    /// `BlockedOn* -> Paused`: the wake condition fired; the operation
    /// re-enters the runnable pool
    pub fn unblock(&mut self) -> RuntimeResult<()> {
        if !self.status.is_blocked() {
            return Err(self.invalid("paused"));
        }
        self.status = OperationStatus::Paused;
        self.waiting_tasks.clear();
        self.blocked_resource = None;
        Ok(())
    }

    /// `-> Completed`: terminal. Reachable from any live status because
    /// iteration teardown completes blocked and parked operations too.
    pub fn complete(&mut self) -> RuntimeResult<()> {
        if self.status == OperationStatus::Completed {
            return Err(self.invalid("completed"));
        }
        self.status = OperationStatus::Completed;
        self.waiting_tasks.clear();
        self.blocked_resource = None;
        Ok(())
    }

    /// Human-readable description of why this operation cannot run
    pub fn blocked_reason(&self) -> String {
        match self.status {
            OperationStatus::BlockedOnWaitAll => format!(
                "waiting for all of {} task(s)",
                self.waiting_tasks.len()
            ),
            OperationStatus::BlockedOnWaitAny => format!(
                "waiting for any of {} task(s)",
                self.waiting_tasks.len()
            ),
            OperationStatus::BlockedOnReceive => "waiting to receive an event".to_string(),
            OperationStatus::BlockedOnResource => match self.blocked_resource {
                Some(resource) => format!("blocked on {}", resource),
                None => "blocked on a resource".to_string(),
            },
            other => format!("not blocked ({})", other),
        }
    }
}
