//! Controlled monitor: mutual exclusion plus condition waiting
//!
//! The monitor keeps two scheduler resources: the acquire queue (FIFO of
//! operations waiting to own the monitor) and the wait queue (operations
//! suspended in [`Monitor::wait`]). A pulse moves waiters from the wait
//! queue to the acquire queue without waking them; they resume one at a
//! time as the monitor is handed over, so no waiter is skipped or resumed
//! twice.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RuntimeError, RuntimeResult};
use crate::operation::{OperationId, ResourceId};
use crate::runtime::Runtime;
use crate::scheduler::SchedulePoint;

struct MonitorState {
    owner: Option<OperationId>,
    granted: Option<OperationId>,
}

struct MonitorInner {
    acquire_queue: ResourceId,
    wait_queue: ResourceId,
    state: Mutex<MonitorState>,
}

/// Mutex-with-condvar primitive (wait / pulse / pulse_all)
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    /// Create a controlled monitor
    pub fn new(rt: &Runtime) -> Self {
        let scheduler = rt.scheduler();
        Self {
            inner: Arc::new(MonitorInner {
                acquire_queue: scheduler.create_resource(),
                wait_queue: scheduler.create_resource(),
                state: Mutex::new(MonitorState {
                    owner: None,
                    granted: None,
                }),
            }),
        }
    }

    /// Enter the monitor, blocking in FIFO order while it is owned
    pub fn acquire(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        let me = scheduler.current_operation()?;

        loop {
            {
                let mut state = self.inner.state.lock();
                if state.granted == Some(me) {
                    state.granted = None;
                    state.owner = Some(me);
                    scheduler.touch_resource(self.inner.acquire_queue, me.as_u64() + 1);
                    return Ok(());
                }
                if state.owner.is_none() && state.granted.is_none() {
                    state.owner = Some(me);
                    scheduler.touch_resource(self.inner.acquire_queue, me.as_u64() + 1);
                    return Ok(());
                }
                if state.owner == Some(me) {
                    return Err(RuntimeError::ResourceMisuse(
                        "monitor is not reentrant".to_string(),
                    ));
                }
            }
            scheduler.block_on_resource(self.inner.acquire_queue)?;
        }
    }

    /// Leave the monitor, handing it to the acquire-queue head if any
    pub fn release(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        let me = scheduler.current_operation()?;
        self.release_ownership(rt, me)?;
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        Ok(())
    }

    /// Release the monitor and suspend until a pulse moves the caller
    /// back through the acquire queue; the monitor is re-owned on return
    pub fn wait(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        let me = scheduler.current_operation()?;
        self.release_ownership(rt, me)?;

        // Park on the wait queue. A pulse requeues the caller onto the
        // acquire queue; a later handoff grants ownership and wakes it.
        loop {
            scheduler.block_on_resource(self.inner.wait_queue)?;
            let mut state = self.inner.state.lock();
            if state.granted == Some(me) {
                state.granted = None;
                state.owner = Some(me);
                scheduler.touch_resource(self.inner.acquire_queue, me.as_u64() + 1);
                return Ok(());
            }
            // Spurious resume without a grant: re-park. The scheduler
            // re-queues the operation on the wait queue.
        }
    }

    /// Move one waiter from the wait queue to the acquire queue
    pub fn pulse(&self, rt: &Runtime) -> RuntimeResult<()> {
        self.pulse_count(rt, 1)
    }

    /// Move every waiter to the acquire queue, preserving FIFO order
    pub fn pulse_all(&self, rt: &Runtime) -> RuntimeResult<()> {
        self.pulse_count(rt, usize::MAX)
    }

    fn pulse_count(&self, rt: &Runtime, count: usize) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        let me = scheduler.current_operation()?;
        {
            let state = self.inner.state.lock();
            if state.owner != Some(me) {
                return Err(RuntimeError::ResourceMisuse(
                    "pulsing a monitor the caller does not own".to_string(),
                ));
            }
        }
        scheduler.requeue_waiters(self.inner.wait_queue, self.inner.acquire_queue, count)?;
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        Ok(())
    }

    /// Drop ownership and hand the monitor to the acquire-queue head
    fn release_ownership(&self, rt: &Runtime, me: OperationId) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        {
            let mut state = self.inner.state.lock();
            if state.owner != Some(me) {
                return Err(RuntimeError::ResourceMisuse(
                    "releasing a monitor the caller does not own".to_string(),
                ));
            }
            state.owner = None;
        }
        let woken = scheduler.signal_resource(self.inner.acquire_queue, 1)?;
        if let Some(&next) = woken.first() {
            self.inner.state.lock().granted = Some(next);
            scheduler.touch_resource(self.inner.acquire_queue, next.as_u64() + 1);
        } else {
            scheduler.touch_resource(self.inner.acquire_queue, 0);
        }
        Ok(())
    }

    /// Whether some operation currently owns the monitor
    pub fn is_owned(&self) -> bool {
        let state = self.inner.state.lock();
        state.owner.is_some() || state.granted.is_some()
    }
}
