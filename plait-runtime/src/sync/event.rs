//! Controlled manual-reset event

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RuntimeResult;
use crate::operation::ResourceId;
use crate::runtime::Runtime;
use crate::scheduler::SchedulePoint;

struct EventState {
    set: bool,
}

struct EventInner {
    resource: ResourceId,
    state: Mutex<EventState>,
}

/// Manual-reset event: `set` wakes every waiter, `reset` re-arms
#[derive(Clone)]
pub struct ManualResetEvent {
    inner: Arc<EventInner>,
}

impl ManualResetEvent {
    /// Create an event with an initial signaled state
    pub fn new(rt: &Runtime, initially_set: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                resource: rt.scheduler().create_resource(),
                state: Mutex::new(EventState { set: initially_set }),
            }),
        }
    }

    /// Block until the event is set; returns immediately (still a
    /// scheduling point) when it already is
    pub fn wait(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        scheduler.current_operation()?;

        loop {
            if self.inner.state.lock().set {
                return Ok(());
            }
            scheduler.block_on_resource(self.inner.resource)?;
            // Re-check: the event may have been reset again before this
            // operation was scheduled.
        }
    }

    /// Signal the event, waking every waiter
    pub fn set(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        scheduler.current_operation()?;
        self.inner.state.lock().set = true;
        scheduler.touch_resource(self.inner.resource, 1);
        scheduler.signal_resource(self.inner.resource, usize::MAX)?;
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        Ok(())
    }

    /// Re-arm the event
    pub fn reset(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        scheduler.current_operation()?;
        self.inner.state.lock().set = false;
        scheduler.touch_resource(self.inner.resource, 0);
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        Ok(())
    }

    /// Whether the event is currently signaled
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().set
    }
}
