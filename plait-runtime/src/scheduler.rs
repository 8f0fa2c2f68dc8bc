//! The operation scheduler
//!
//! The scheduler is the global coordinator of one test iteration. Every
//! operation is backed by an OS thread, but exactly one thread holds the
//! schedule and runs user code at any instant: all other threads are
//! parked on per-operation condition variables. A single mutex protects
//! all scheduler state; every public method acquires it.
//!
//! Scheduling points are the only places control can move between
//! operations. At each one the scheduler verifies the calling thread is
//! the scheduled operation's thread, consults the exploration strategy for
//! the next operation, appends the decision to the execution trace, and
//! signals exactly one condition variable.
//!
//! Locking discipline: the strategy mutex and any fingerprint-source locks
//! are only ever taken while holding the scheduler state mutex, never the
//! other way around. Fingerprint sources must not call back into the
//! scheduler.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use plait_strategies::{ExplorationStrategy, ExecutionTrace, StrategyError, ValueGenerator};

use crate::error::{RuntimeError, RuntimeResult};
use crate::failure::{BlockedOperation, Failure, IterationOutcome};
use crate::operation::{Operation, OperationId, OperationStatus, ResourceId};
use crate::task::{TaskId, TaskStatus};

/// Strategy shared between the engine (across iterations) and the
/// scheduler (within one iteration)
pub type SharedStrategy = Arc<Mutex<Box<dyn ExplorationStrategy>>>;

/// Why a scheduling point was reached; `Yield` marks an explicit
/// user-requested yield, which strategies may treat as a deprioritization
/// hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePoint {
    /// A new operation was spawned
    Create,
    /// Explicit `yield_now`
    Yield,
    /// A task await
    Await,
    /// A synchronization resource was acquired, released, or signaled
    Resource,
    /// A mailbox was used
    Mailbox,
    /// A nondeterministic value was drawn
    Choice,
}

/// Wake predicate for waiting on task sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Wake when every task in the set is terminal
    All,
    /// Wake when any task in the set is terminal
    Any,
}

/// Scheduler tuning knobs (a subset of the engine configuration)
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Report hot monitors as liveness violations
    pub liveness_checking: bool,
    /// Record state fingerprints after every decision
    pub fingerprinting: bool,
    /// Consecutive identical fingerprints before the iteration is treated
    /// as a potential livelock
    pub fingerprint_livelock_threshold: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            liveness_checking: true,
            fingerprinting: false,
            fingerprint_livelock_threshold: 64,
        }
    }
}

/// Per-iteration scheduling statistics
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SchedulerStats {
    /// Scheduling decisions made
    pub decisions: u64,
    /// Operations created
    pub operations_created: u64,
    /// Tasks created
    pub tasks_created: u64,
    /// Largest runnable set observed at a decision
    pub max_runnable: u64,
}

/// Probe the engine installs so the scheduler can ask "is any monitor
/// hot?" without depending on the actor layer
pub type LivenessProbe = Box<dyn Fn() -> Option<(String, String)> + Send>;

/// Extra state folded into fingerprints (mailbox sizes, monitor states)
pub type FingerprintSource = Box<dyn Fn(&mut DefaultHasher) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// One operation at a time, strategy-controlled
    Systematic,
    /// Degraded fallback: free-running threads with randomized delays
    Fuzzing,
}

struct TaskRecord {
    status: TaskStatus,
    owner: Option<OperationId>,
    awaiters: BTreeSet<OperationId>,
}

struct ResourceRecord {
    waiters: VecDeque<OperationId>,
    /// Primitive-supplied tag folded into fingerprints (owner, count, ...)
    tag: u64,
}

struct SchedState {
    ops: BTreeMap<OperationId, Operation>,
    parked: BTreeMap<OperationId, Arc<Condvar>>,
    threads_of: BTreeMap<OperationId, ThreadId>,
    tasks: BTreeMap<TaskId, TaskRecord>,
    resources: BTreeMap<ResourceId, ResourceRecord>,
    scheduled: Option<OperationId>,
    strategy: SharedStrategy,
    trace: ExecutionTrace,
    phase: Phase,
    failure: Option<Failure>,
    internal_error: Option<String>,
    max_steps_hit: bool,
    canceled_ops: BTreeSet<OperationId>,
    fuzz_receive_ready: BTreeSet<OperationId>,
    fuzz_generator: Option<ValueGenerator>,
    next_op_id: u64,
    next_task_id: u64,
    next_resource_id: u64,
    settings: SchedulerSettings,
    liveness_probe: Option<LivenessProbe>,
    fingerprint_sources: Vec<FingerprintSource>,
    last_fingerprint: Option<u64>,
    fingerprint_run: u64,
    stats: SchedulerStats,
}

struct SchedulerInner {
    state: Mutex<SchedState>,
    iteration_done: Condvar,
    /// Fuzzing-mode wakeups for task completion and resource signals
    fuzz_wakeup: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
    mode: Mode,
}

/// Handle to the per-iteration scheduler; cheap to clone
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a systematic scheduler driven by an exploration strategy
    pub fn new(strategy: SharedStrategy, settings: SchedulerSettings) -> Self {
        Self::with_mode(strategy, settings, Mode::Systematic, None)
    }

    /// Create a fuzzing-mode scheduler that injects seeded random delays
    /// instead of controlling the schedule
    pub fn new_fuzzing(strategy: SharedStrategy, settings: SchedulerSettings, seed: u64) -> Self {
        Self::with_mode(strategy, settings, Mode::Fuzzing, Some(ValueGenerator::new(seed)))
    }

    fn with_mode(
        strategy: SharedStrategy,
        settings: SchedulerSettings,
        mode: Mode,
        fuzz_generator: Option<ValueGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedState {
                    ops: BTreeMap::new(),
                    parked: BTreeMap::new(),
                    threads_of: BTreeMap::new(),
                    tasks: BTreeMap::new(),
                    resources: BTreeMap::new(),
                    scheduled: None,
                    strategy,
                    trace: ExecutionTrace::new(),
                    phase: Phase::Running,
                    failure: None,
                    internal_error: None,
                    max_steps_hit: false,
                    canceled_ops: BTreeSet::new(),
                    fuzz_receive_ready: BTreeSet::new(),
                    fuzz_generator,
                    next_op_id: 0,
                    next_task_id: 0,
                    next_resource_id: 0,
                    settings,
                    liveness_probe: None,
                    fingerprint_sources: Vec::new(),
                    last_fingerprint: None,
                    fingerprint_run: 0,
                    stats: SchedulerStats::default(),
                }),
                iteration_done: Condvar::new(),
                fuzz_wakeup: Condvar::new(),
                threads: Mutex::new(Vec::new()),
                mode,
            }),
        }
    }

    /// Whether this scheduler runs in the delay-fuzzing fallback mode
    pub fn is_fuzzing(&self) -> bool {
        self.inner.mode == Mode::Fuzzing
    }

    // ------------------------------------------------------------------
    // Registration and lifecycle
    // ------------------------------------------------------------------

    /// Register a new operation and its backing task
    ///
    /// The first operation of an iteration becomes the scheduled one.
    pub fn register_spawn(
        &self,
        name: &str,
        parent: Option<OperationId>,
    ) -> RuntimeResult<(OperationId, TaskId)> {
        let mut st = self.inner.state.lock();
        if st.phase == Phase::Stopped {
            return Err(RuntimeError::IterationStopped);
        }

        let op_id = OperationId(st.next_op_id);
        st.next_op_id += 1;
        let task_id = TaskId(st.next_task_id);
        st.next_task_id += 1;

        let first = st.ops.is_empty();
        let mut operation = Operation::new(op_id, name, parent);
        // In fuzzing mode every operation runs freely.
        operation.activate(first || self.inner.mode == Mode::Fuzzing)?;
        if first {
            st.scheduled = Some(op_id);
        }

        st.parked.insert(op_id, Arc::new(Condvar::new()));
        st.ops.insert(op_id, operation);
        st.tasks.insert(
            task_id,
            TaskRecord {
                status: TaskStatus::Pending,
                owner: Some(op_id),
                awaiters: BTreeSet::new(),
            },
        );
        st.stats.operations_created += 1;
        st.stats.tasks_created += 1;
        debug!(op = op_id.as_u64(), task = task_id.0, name, "operation registered");
        Ok((op_id, task_id))
    }

    /// Keep a backing thread handle for teardown joins
    pub(crate) fn track_thread(&self, handle: JoinHandle<()>) {
        self.inner.threads.lock().push(handle);
    }

    /// Called by a backing thread before running user code; parks until
    /// the operation is scheduled
    pub fn start_operation(&self, op: OperationId) -> RuntimeResult<()> {
        let mut st = self.inner.state.lock();
        st.threads_of.insert(op, thread::current().id());
        if self.inner.mode == Mode::Fuzzing {
            if st.phase == Phase::Stopped {
                return Err(RuntimeError::IterationStopped);
            }
            return Ok(());
        }
        self.park_until_scheduled(&mut st, op)
    }

    /// Mark the operation completed, seal its task, wake awaiters, and
    /// hand the schedule to the next operation
    ///
    /// Never fails: it runs on the unwinding path of every backing thread.
    pub fn finish_operation(&self, op: OperationId, task: TaskId, status: TaskStatus) {
        let mut st = self.inner.state.lock();
        Self::complete_task_locked(&mut st, task, status);

        if let Some(operation) = st.ops.get_mut(&op) {
            if operation.status() != OperationStatus::Completed {
                let _ = operation.complete();
            }
        }
        let was_scheduled = st.scheduled == Some(op);
        if was_scheduled {
            st.scheduled = None;
        }
        debug!(op = op.as_u64(), task = task.0, status = ?status, "operation finished");

        if st.phase == Phase::Running {
            if self.inner.mode == Mode::Fuzzing {
                if st.ops.values().all(|o| o.status() == OperationStatus::Completed) {
                    self.stop_locked(&mut st);
                }
            } else if was_scheduled {
                // Errors here mean the iteration is over (deadlock found,
                // replay diverged, ...); the thread is exiting either way.
                let _ = self.pick_next_locked(&mut st, Some(op), SchedulePoint::Create);
            }
        }
        self.inner.fuzz_wakeup.notify_all();
    }

    // ------------------------------------------------------------------
    // Scheduling points
    // ------------------------------------------------------------------

    /// Yield the schedule and let the strategy pick the next operation
    pub fn scheduling_point(&self, point: SchedulePoint) -> RuntimeResult<()> {
        if self.inner.mode == Mode::Fuzzing {
            return self.fuzz_pause();
        }
        let mut st = self.inner.state.lock();
        let me = self.verify_controlled(&mut st)?;
        st.ops
            .get_mut(&me)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown operation {}", me)))?
            .deschedule()?;
        self.pick_next_locked(&mut st, Some(me), point)?;
        self.park_until_scheduled(&mut st, me)
    }

    /// The operation currently holding the schedule; verifies the caller
    pub fn current_operation(&self) -> RuntimeResult<OperationId> {
        let mut st = self.inner.state.lock();
        if self.inner.mode == Mode::Fuzzing {
            if st.phase == Phase::Stopped {
                return Err(RuntimeError::IterationStopped);
            }
            return self.fuzz_current(&st).ok_or_else(|| {
                RuntimeError::Internal("unregistered fuzzing thread".to_string())
            });
        }
        self.verify_controlled(&mut st)
    }

    /// Whether the calling thread backs a registered operation
    pub fn is_controlled_thread(&self) -> bool {
        let st = self.inner.state.lock();
        let tid = thread::current().id();
        st.threads_of.values().any(|&t| t == tid)
    }

    /// Resolve a nondeterministic boolean through the strategy and record
    /// it in the trace
    pub fn next_bool(&self) -> RuntimeResult<bool> {
        let mut st = self.inner.state.lock();
        if self.inner.mode == Mode::Fuzzing {
            let value = st
                .fuzz_generator
                .as_mut()
                .map(|g| g.next_bool())
                .unwrap_or(false);
            st.trace.record_bool(value);
            return Ok(value);
        }
        self.verify_controlled(&mut st)?;
        let drawn = st.strategy.lock().next_bool();
        match drawn {
            Ok(value) => {
                st.trace.record_bool(value);
                Ok(value)
            }
            Err(e) => {
                self.fail_locked(&mut st, replay_failure(e));
                Err(RuntimeError::IterationStopped)
            }
        }
    }

    /// Resolve a nondeterministic integer in `[0, bound)` through the
    /// strategy and record it in the trace
    pub fn next_int(&self, bound: u32) -> RuntimeResult<u32> {
        let mut st = self.inner.state.lock();
        if self.inner.mode == Mode::Fuzzing {
            let value = st
                .fuzz_generator
                .as_mut()
                .map(|g| g.next_int(bound))
                .unwrap_or(0);
            st.trace.record_int(value, bound);
            return Ok(value);
        }
        self.verify_controlled(&mut st)?;
        let drawn = st.strategy.lock().next_int(bound);
        match drawn {
            Ok(value) => {
                st.trace.record_int(value, bound);
                Ok(value)
            }
            Err(e) => {
                self.fail_locked(&mut st, replay_failure(e));
                Err(RuntimeError::IterationStopped)
            }
        }
    }

    // ------------------------------------------------------------------
    // Task waits and completion
    // ------------------------------------------------------------------

    /// Block the calling operation until the wait predicate over `tasks`
    /// holds (conjunction for `All`, disjunction for `Any`)
    pub fn wait_for_tasks(&self, tasks: &[TaskId], mode: WaitMode) -> RuntimeResult<()> {
        if self.inner.mode == Mode::Fuzzing {
            return self.fuzz_wait_for_tasks(tasks, mode);
        }
        let mut st = self.inner.state.lock();
        let me = self.verify_controlled(&mut st)?;

        let pending: BTreeSet<TaskId> = tasks
            .iter()
            .copied()
            .filter(|t| {
                st.tasks
                    .get(t)
                    .map(|r| !r.status.is_terminal())
                    .unwrap_or(false)
            })
            .collect();
        let satisfied = tasks.is_empty()
            || match mode {
                WaitMode::All => pending.is_empty(),
                WaitMode::Any => pending.len() < tasks.len(),
            };

        if satisfied {
            // Already satisfied, but an await is still a scheduling point.
            st.ops
                .get_mut(&me)
                .ok_or_else(|| RuntimeError::Internal(format!("unknown operation {}", me)))?
                .deschedule()?;
            self.pick_next_locked(&mut st, Some(me), SchedulePoint::Await)?;
            return self.park_until_scheduled(&mut st, me);
        }

        for t in &pending {
            if let Some(record) = st.tasks.get_mut(t) {
                record.awaiters.insert(me);
            }
        }
        st.ops
            .get_mut(&me)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown operation {}", me)))?
            .block_on_tasks(pending, mode == WaitMode::Any)?;
        self.pick_next_locked(&mut st, Some(me), SchedulePoint::Await)?;
        self.park_until_scheduled(&mut st, me)
    }

    /// Current status of a task
    pub fn task_status(&self, task: TaskId) -> TaskStatus {
        let st = self.inner.state.lock();
        st.tasks
            .get(&task)
            .map(|r| r.status)
            .unwrap_or(TaskStatus::Pending)
    }

    /// Cancel a pending task: seal it as `Canceled`, wake its awaiters,
    /// and release its owning operation so it can observe the
    /// cancellation at its next scheduling point
    pub fn cancel_task(&self, task: TaskId) -> RuntimeResult<()> {
        let mut st = self.inner.state.lock();
        let already_terminal = st
            .tasks
            .get(&task)
            .map(|r| r.status.is_terminal())
            .unwrap_or(true);
        if already_terminal {
            return Ok(());
        }
        Self::complete_task_locked(&mut st, task, TaskStatus::Canceled);

        let owner = st.tasks.get(&task).and_then(|r| r.owner);
        if let Some(owner) = owner {
            st.canceled_ops.insert(owner);
            self.release_blocked_locked(&mut st, owner);
        }
        self.inner.fuzz_wakeup.notify_all();
        Ok(())
    }

    /// Seal a task's terminal state and wake every awaiter whose wait
    /// predicate is now satisfied. Terminal tasks never mutate again.
    fn complete_task_locked(st: &mut SchedState, task: TaskId, status: TaskStatus) {
        let awaiters = match st.tasks.get_mut(&task) {
            Some(record) if !record.status.is_terminal() => {
                record.status = status;
                std::mem::take(&mut record.awaiters)
            }
            _ => return,
        };

        for awaiter in awaiters {
            let (woken, remaining) = match st.ops.get_mut(&awaiter) {
                Some(op) => {
                    if op.task_completed(task) {
                        let remaining: Vec<TaskId> = op.waiting_tasks().iter().copied().collect();
                        let _ = op.unblock();
                        (true, remaining)
                    } else {
                        (false, Vec::new())
                    }
                }
                None => (false, Vec::new()),
            };
            if woken {
                // A wait-any awaiter leaves the awaiter sets of the tasks
                // it is no longer waiting on.
                for t in remaining {
                    if let Some(record) = st.tasks.get_mut(&t) {
                        record.awaiters.remove(&awaiter);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Create a resource operations can block on
    pub fn create_resource(&self) -> ResourceId {
        let mut st = self.inner.state.lock();
        let id = ResourceId(st.next_resource_id);
        st.next_resource_id += 1;
        st.resources.insert(
            id,
            ResourceRecord {
                waiters: VecDeque::new(),
                tag: 0,
            },
        );
        id
    }

    /// Fold a primitive's observable state (owner, count, flags) into the
    /// fingerprint input for this resource
    pub fn touch_resource(&self, resource: ResourceId, tag: u64) {
        let mut st = self.inner.state.lock();
        if let Some(record) = st.resources.get_mut(&resource) {
            record.tag = tag;
        }
    }

    /// Queue the calling operation on a resource's FIFO and yield
    ///
    /// Returns when the operation is woken (granted by a signal, requeued
    /// and granted, or released by cancellation teardown); callers re-check
    /// their primitive's state in a loop.
    pub fn block_on_resource(&self, resource: ResourceId) -> RuntimeResult<()> {
        if self.inner.mode == Mode::Fuzzing {
            return self.fuzz_block_on_resource(resource);
        }
        let mut st = self.inner.state.lock();
        let me = self.verify_controlled(&mut st)?;
        st.resources
            .get_mut(&resource)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown {}", resource)))?
            .waiters
            .push_back(me);
        st.ops
            .get_mut(&me)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown operation {}", me)))?
            .block_on_resource(resource)?;
        self.pick_next_locked(&mut st, Some(me), SchedulePoint::Resource)?;
        self.park_until_scheduled(&mut st, me)
    }

    /// Wake up to `count` waiters in FIFO order; returns the woken ids
    pub fn signal_resource(&self, resource: ResourceId, count: usize) -> RuntimeResult<Vec<OperationId>> {
        let mut st = self.inner.state.lock();
        let mut woken = Vec::new();
        for _ in 0..count {
            let next = match st.resources.get_mut(&resource) {
                Some(record) => record.waiters.pop_front(),
                None => None,
            };
            match next {
                Some(op) => {
                    if let Some(operation) = st.ops.get_mut(&op) {
                        if operation.status() == OperationStatus::BlockedOnResource {
                            operation.unblock()?;
                        }
                    }
                    woken.push(op);
                }
                None => break,
            }
        }
        if !woken.is_empty() {
            trace!(resource = resource.0, woken = woken.len(), "resource signaled");
            self.inner.fuzz_wakeup.notify_all();
        }
        Ok(woken)
    }

    /// Move up to `count` waiters from one resource FIFO to another,
    /// preserving order; the operations stay blocked (monitor pulse)
    pub fn requeue_waiters(
        &self,
        from: ResourceId,
        to: ResourceId,
        count: usize,
    ) -> RuntimeResult<usize> {
        let mut st = self.inner.state.lock();
        let mut moved = Vec::new();
        for _ in 0..count {
            let next = match st.resources.get_mut(&from) {
                Some(record) => record.waiters.pop_front(),
                None => None,
            };
            match next {
                Some(op) => moved.push(op),
                None => break,
            }
        }
        for &op in &moved {
            if let Some(operation) = st.ops.get_mut(&op) {
                if operation.status() == OperationStatus::BlockedOnResource {
                    operation.requeue_resource(to)?;
                }
            }
            st.resources
                .get_mut(&to)
                .ok_or_else(|| RuntimeError::Internal(format!("unknown {}", to)))?
                .waiters
                .push_back(op);
        }
        Ok(moved.len())
    }

    /// Snapshot of a resource's FIFO
    pub fn resource_waiters(&self, resource: ResourceId) -> Vec<OperationId> {
        let st = self.inner.state.lock();
        st.resources
            .get(&resource)
            .map(|r| r.waiters.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Wake one specific waiter, removing it from the FIFO; returns false
    /// when the operation was not queued there
    pub fn wake_waiter(&self, resource: ResourceId, op: OperationId) -> RuntimeResult<bool> {
        let mut st = self.inner.state.lock();
        let found = match st.resources.get_mut(&resource) {
            Some(record) => {
                let before = record.waiters.len();
                record.waiters.retain(|&w| w != op);
                before != record.waiters.len()
            }
            None => false,
        };
        if found {
            if let Some(operation) = st.ops.get_mut(&op) {
                if operation.status() == OperationStatus::BlockedOnResource {
                    operation.unblock()?;
                }
            }
            self.inner.fuzz_wakeup.notify_all();
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Mailbox receive support
    // ------------------------------------------------------------------

    /// Park the calling operation until a matching event is delivered
    pub fn block_on_receive(&self) -> RuntimeResult<()> {
        if self.inner.mode == Mode::Fuzzing {
            return self.fuzz_block_on_receive();
        }
        let mut st = self.inner.state.lock();
        let me = self.verify_controlled(&mut st)?;
        st.ops
            .get_mut(&me)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown operation {}", me)))?
            .block_on_receive()?;
        self.pick_next_locked(&mut st, Some(me), SchedulePoint::Mailbox)?;
        self.park_until_scheduled(&mut st, me)
    }

    /// Wake an operation parked in a receive; called by the enqueuer that
    /// matched its pending receive
    pub fn unblock_receive(&self, op: OperationId) -> RuntimeResult<()> {
        let mut st = self.inner.state.lock();
        if let Some(operation) = st.ops.get_mut(&op) {
            if operation.status() == OperationStatus::BlockedOnReceive {
                operation.unblock()?;
            }
        }
        st.fuzz_receive_ready.insert(op);
        self.inner.fuzz_wakeup.notify_all();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Failures and teardown
    // ------------------------------------------------------------------

    /// Report a bug; the first failure of an iteration wins and stops it
    pub fn report_failure(&self, failure: Failure) {
        let mut st = self.inner.state.lock();
        self.fail_locked(&mut st, failure);
    }

    /// Cancel the iteration without reporting a bug (timeout, engine
    /// shutdown); blocked operations are released and threads unwind
    pub fn cancel_iteration(&self) {
        let mut st = self.inner.state.lock();
        self.stop_locked(&mut st);
    }

    /// Install the probe answering "is any monitor in a hot state?"
    pub fn set_liveness_probe(&self, probe: LivenessProbe) {
        let mut st = self.inner.state.lock();
        st.liveness_probe = Some(probe);
    }

    /// Register extra state folded into fingerprints
    ///
    /// Sources run under the scheduler lock and must not call back into
    /// the scheduler.
    pub fn add_fingerprint_source(&self, source: FingerprintSource) {
        let mut st = self.inner.state.lock();
        st.fingerprint_sources.push(source);
    }

    /// Block until the iteration is over; on timeout the iteration is
    /// canceled and treated as a step-budget exhaustion hint
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> IterationOutcome {
        let mut st = self.inner.state.lock();
        while st.phase != Phase::Stopped {
            match timeout {
                Some(duration) => {
                    let result = self.inner.iteration_done.wait_for(&mut st, duration);
                    if result.timed_out() && st.phase != Phase::Stopped {
                        warn!("iteration wall-clock budget exhausted; canceling");
                        st.max_steps_hit = true;
                        self.stop_locked(&mut st);
                    }
                }
                None => self.inner.iteration_done.wait(&mut st),
            }
        }
        if let Some(failure) = st.failure.clone() {
            IterationOutcome::Failed(failure)
        } else if st.max_steps_hit {
            IterationOutcome::MaxStepsReached
        } else {
            IterationOutcome::Ok
        }
    }

    /// Join every backing thread; call after `wait_for_completion`
    pub fn join_threads(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.threads.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Fatal scheduler invariant violation, if one occurred
    pub fn internal_error(&self) -> Option<String> {
        self.inner.state.lock().internal_error.clone()
    }

    /// Snapshot of every operation (id, name, status) for reports
    pub fn operations_snapshot(&self) -> Vec<(u64, String, OperationStatus)> {
        let st = self.inner.state.lock();
        st.ops
            .values()
            .map(|o| (o.id().as_u64(), o.name().to_string(), o.status()))
            .collect()
    }

    /// Copy of the execution trace so far
    pub fn trace_snapshot(&self) -> ExecutionTrace {
        self.inner.state.lock().trace.clone()
    }

    /// Copy of the iteration statistics
    pub fn stats(&self) -> SchedulerStats {
        self.inner.state.lock().stats.clone()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Verify the calling thread backs the scheduled operation
    ///
    /// A mismatch is the uncontrolled-concurrency bug: it is reported and
    /// the iteration aborts.
    fn verify_controlled(&self, st: &mut MutexGuard<'_, SchedState>) -> RuntimeResult<OperationId> {
        if st.phase == Phase::Stopped {
            return Err(RuntimeError::IterationStopped);
        }
        let scheduled = st
            .scheduled
            .ok_or_else(|| RuntimeError::Internal("no scheduled operation".to_string()))?;
        let tid = thread::current().id();
        if st.threads_of.get(&scheduled) != Some(&tid) {
            let evidence = format!(
                "thread {:?} reached a scheduling point while {} was scheduled",
                tid, scheduled
            );
            self.fail_locked(st, Failure::UncontrolledConcurrency {
                evidence: evidence.clone(),
            });
            return Err(RuntimeError::UncontrolledConcurrency { evidence });
        }
        if st.canceled_ops.contains(&scheduled) {
            return Err(RuntimeError::TaskCanceled);
        }
        Ok(scheduled)
    }

    /// Park on the operation's condvar until it holds the schedule
    fn park_until_scheduled(
        &self,
        st: &mut MutexGuard<'_, SchedState>,
        op: OperationId,
    ) -> RuntimeResult<()> {
        let condvar = st
            .parked
            .get(&op)
            .cloned()
            .ok_or_else(|| RuntimeError::Internal(format!("unknown operation {}", op)))?;
        loop {
            if st.phase == Phase::Stopped {
                return Err(RuntimeError::IterationStopped);
            }
            if st.scheduled == Some(op) {
                if st.canceled_ops.contains(&op) {
                    return Err(RuntimeError::TaskCanceled);
                }
                return Ok(());
            }
            condvar.wait(st);
        }
    }

    /// Choose and signal the next operation; the caller has already
    /// descheduled (or completed) itself
    fn pick_next_locked(
        &self,
        st: &mut MutexGuard<'_, SchedState>,
        current: Option<OperationId>,
        point: SchedulePoint,
    ) -> RuntimeResult<()> {
        if st.phase == Phase::Stopped {
            return Err(RuntimeError::IterationStopped);
        }

        let reached = st.strategy.lock().has_reached_max_steps();
        if reached {
            return self.finish_on_budget(st);
        }

        let runnable: Vec<OperationId> = st
            .ops
            .values()
            .filter(|o| o.status().is_runnable())
            .map(Operation::id)
            .collect();
        st.stats.max_runnable = st.stats.max_runnable.max(runnable.len() as u64);

        if runnable.is_empty() {
            let blocked: Vec<BlockedOperation> = st
                .ops
                .values()
                .filter(|o| o.status().is_blocked())
                .map(|o| BlockedOperation {
                    id: o.id().as_u64(),
                    name: o.name().to_string(),
                    reason: o.blocked_reason(),
                })
                .collect();

            if blocked.is_empty() {
                // Every operation completed: the iteration is over. A hot
                // monitor at termination is a liveness violation.
                if let Some(failure) = self.hot_monitor_violation(st) {
                    self.fail_locked(st, failure);
                    return Err(RuntimeError::IterationStopped);
                }
                st.scheduled = None;
                self.stop_locked(st);
                return Ok(());
            }

            // Deadlock, unless a hot monitor makes it a liveness violation.
            let failure = self
                .hot_monitor_violation(st)
                .unwrap_or(Failure::Deadlock { blocked });
            self.fail_locked(st, failure);
            return Err(RuntimeError::IterationStopped);
        }

        let previous = current.unwrap_or(runnable[0]);
        let is_yielding = point == SchedulePoint::Yield;
        let choice = st
            .strategy
            .lock()
            .next_operation(&runnable, previous, is_yielding);
        let next = match choice {
            Ok(Some(op)) => op,
            Ok(None) => {
                let message = "strategy returned no operation for a non-empty enabled set".to_string();
                st.internal_error = Some(message.clone());
                self.stop_locked(st);
                return Err(RuntimeError::Internal(message));
            }
            Err(e) => {
                self.fail_locked(st, replay_failure(e));
                return Err(RuntimeError::IterationStopped);
            }
        };

        st.trace.record_scheduled(next);
        st.stats.decisions += 1;
        trace!(op = next.as_u64(), point = ?point, "scheduling decision");

        if st.settings.fingerprinting {
            let fingerprint = Self::fingerprint_locked(st);
            st.trace.record_fingerprint(fingerprint);
            if st.last_fingerprint == Some(fingerprint) {
                st.fingerprint_run += 1;
            } else {
                st.last_fingerprint = Some(fingerprint);
                st.fingerprint_run = 0;
            }
            if st.fingerprint_run >= st.settings.fingerprint_livelock_threshold {
                debug!(fingerprint, run = st.fingerprint_run, "fingerprint livelock suspected");
                return self.finish_on_budget(st);
            }
        }

        st.ops
            .get_mut(&next)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown operation {}", next)))?
            .schedule()
            .map_err(|e| RuntimeError::Internal(format!("scheduling a non-runnable operation: {}", e)))?;
        st.scheduled = Some(next);
        if let Some(condvar) = st.parked.get(&next) {
            condvar.notify_one();
        }
        Ok(())
    }

    /// Step budget (or fingerprint livelock heuristic) exhausted: a hot
    /// monitor makes it a liveness violation, otherwise the iteration
    /// terminates with a `MaxStepsReached` hint
    fn finish_on_budget(&self, st: &mut MutexGuard<'_, SchedState>) -> RuntimeResult<()> {
        if let Some(failure) = self.hot_monitor_violation(st) {
            self.fail_locked(st, failure);
        } else {
            st.max_steps_hit = true;
            self.stop_locked(st);
        }
        Err(RuntimeError::IterationStopped)
    }

    fn hot_monitor_violation(&self, st: &mut MutexGuard<'_, SchedState>) -> Option<Failure> {
        if !st.settings.liveness_checking {
            return None;
        }
        let probe = st.liveness_probe.as_ref()?;
        let (monitor, hot_state) = probe()?;
        Some(Failure::LivenessViolation { monitor, hot_state })
    }

    /// Release a blocked operation during cancellation so it can unwind
    fn release_blocked_locked(&self, st: &mut MutexGuard<'_, SchedState>, op: OperationId) {
        let status = match st.ops.get(&op) {
            Some(operation) => operation.status(),
            None => return,
        };
        if !status.is_blocked() {
            return;
        }
        // Leave whatever wait list the operation sits in.
        if let Some(resource) = st.ops.get(&op).and_then(Operation::blocked_resource) {
            if let Some(record) = st.resources.get_mut(&resource) {
                record.waiters.retain(|&w| w != op);
            }
        }
        let waiting: Vec<TaskId> = st
            .ops
            .get(&op)
            .map(|o| o.waiting_tasks().iter().copied().collect())
            .unwrap_or_default();
        for t in waiting {
            if let Some(record) = st.tasks.get_mut(&t) {
                record.awaiters.remove(&op);
            }
        }
        if let Some(operation) = st.ops.get_mut(&op) {
            let _ = operation.unblock();
        }
    }

    fn fail_locked(&self, st: &mut MutexGuard<'_, SchedState>, failure: Failure) {
        if st.failure.is_none() {
            debug!(kind = failure.kind(), "failure reported");
            st.failure = Some(failure);
        }
        self.stop_locked(st);
    }

    fn stop_locked(&self, st: &mut MutexGuard<'_, SchedState>) {
        if st.phase == Phase::Stopped {
            return;
        }
        st.phase = Phase::Stopped;
        for condvar in st.parked.values() {
            condvar.notify_all();
        }
        self.inner.iteration_done.notify_all();
        self.inner.fuzz_wakeup.notify_all();
    }

    /// Stable hash over operation statuses, resource states, and
    /// registered sources (mailbox sizes, monitor states)
    fn fingerprint_locked(st: &mut MutexGuard<'_, SchedState>) -> u64 {
        let mut hasher = DefaultHasher::new();
        for operation in st.ops.values() {
            operation.id().as_u64().hash(&mut hasher);
            operation.status().hash(&mut hasher);
        }
        for (id, record) in &st.resources {
            id.0.hash(&mut hasher);
            record.tag.hash(&mut hasher);
            record.waiters.len().hash(&mut hasher);
        }
        for source in &st.fingerprint_sources {
            source(&mut hasher);
        }
        hasher.finish()
    }

    // ------------------------------------------------------------------
    // Fuzzing fallback
    // ------------------------------------------------------------------

    /// Randomized delay instead of a controlled transfer
    fn fuzz_pause(&self) -> RuntimeResult<()> {
        let delay = {
            let mut st = self.inner.state.lock();
            if st.phase == Phase::Stopped {
                return Err(RuntimeError::IterationStopped);
            }
            if let Some(me) = self.fuzz_current(&st) {
                if st.canceled_ops.contains(&me) {
                    return Err(RuntimeError::TaskCanceled);
                }
            }
            st.fuzz_generator
                .as_mut()
                .map(|g| g.next_int(500))
                .unwrap_or(0)
        };
        if delay == 0 {
            thread::yield_now();
        } else {
            thread::sleep(Duration::from_micros(u64::from(delay)));
        }
        Ok(())
    }

    fn fuzz_current(&self, st: &SchedState) -> Option<OperationId> {
        let tid = thread::current().id();
        st.threads_of
            .iter()
            .find(|(_, &t)| t == tid)
            .map(|(&op, _)| op)
    }

    fn fuzz_wait_for_tasks(&self, tasks: &[TaskId], mode: WaitMode) -> RuntimeResult<()> {
        let mut st = self.inner.state.lock();
        let me = self.fuzz_current(&st);
        loop {
            if st.phase == Phase::Stopped {
                return Err(RuntimeError::IterationStopped);
            }
            if let Some(me) = me {
                if st.canceled_ops.contains(&me) {
                    return Err(RuntimeError::TaskCanceled);
                }
            }
            let terminal = tasks
                .iter()
                .filter(|t| {
                    st.tasks
                        .get(t)
                        .map(|r| r.status.is_terminal())
                        .unwrap_or(true)
                })
                .count();
            let satisfied = tasks.is_empty()
                || match mode {
                    WaitMode::All => terminal == tasks.len(),
                    WaitMode::Any => terminal > 0,
                };
            if satisfied {
                return Ok(());
            }
            self.inner.fuzz_wakeup.wait(&mut st);
        }
    }

    fn fuzz_block_on_resource(&self, resource: ResourceId) -> RuntimeResult<()> {
        let mut st = self.inner.state.lock();
        let me = self
            .fuzz_current(&st)
            .ok_or_else(|| RuntimeError::Internal("unregistered fuzzing thread".to_string()))?;
        st.resources
            .get_mut(&resource)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown {}", resource)))?
            .waiters
            .push_back(me);
        loop {
            if st.phase == Phase::Stopped {
                return Err(RuntimeError::IterationStopped);
            }
            if st.canceled_ops.contains(&me) {
                return Err(RuntimeError::TaskCanceled);
            }
            let queued = st
                .resources
                .get(&resource)
                .map(|r| r.waiters.contains(&me))
                .unwrap_or(false);
            if !queued {
                return Ok(());
            }
            self.inner.fuzz_wakeup.wait(&mut st);
        }
    }

    fn fuzz_block_on_receive(&self) -> RuntimeResult<()> {
        let mut st = self.inner.state.lock();
        let me = self
            .fuzz_current(&st)
            .ok_or_else(|| RuntimeError::Internal("unregistered fuzzing thread".to_string()))?;
        loop {
            if st.phase == Phase::Stopped {
                return Err(RuntimeError::IterationStopped);
            }
            if st.fuzz_receive_ready.remove(&me) {
                return Ok(());
            }
            self.inner.fuzz_wakeup.wait(&mut st);
        }
    }
}

/// Map a strategy replay error to the bug it represents
fn replay_failure(error: StrategyError) -> Failure {
    match error {
        StrategyError::ReplayDivergence {
            index,
            expected,
            observed,
        } => Failure::TraceReplayFailure {
            index,
            expected,
            observed,
        },
        StrategyError::ReplayExhausted { index } => Failure::TraceReplayFailure {
            index,
            expected: "end of trace".to_string(),
            observed: "execution requested another decision".to_string(),
        },
        StrategyError::MissingReplayTrace => Failure::TraceReplayFailure {
            index: 0,
            expected: "a persisted trace".to_string(),
            observed: "none".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = SchedulerSettings::default();
        assert!(settings.liveness_checking);
        assert!(!settings.fingerprinting);
        assert_eq!(settings.fingerprint_livelock_threshold, 64);
    }

    #[test]
    fn test_replay_failure_mapping() {
        let failure = replay_failure(StrategyError::ReplayDivergence {
            index: 4,
            expected: "op 1 enabled".to_string(),
            observed: "enabled set [2]".to_string(),
        });
        assert_eq!(failure.kind(), "trace-replay-failure");

        let failure = replay_failure(StrategyError::ReplayExhausted { index: 9 });
        assert!(matches!(failure, Failure::TraceReplayFailure { index: 9, .. }));
    }
}
