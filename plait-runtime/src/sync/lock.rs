//! Controlled mutual-exclusion lock

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RuntimeError, RuntimeResult};
use crate::operation::{OperationId, ResourceId};
use crate::runtime::Runtime;
use crate::scheduler::SchedulePoint;

struct LockState {
    owner: Option<OperationId>,
    /// Operation a releasing owner handed the lock to, not yet resumed
    granted: Option<OperationId>,
}

struct LockInner {
    resource: ResourceId,
    state: Mutex<LockState>,
}

/// Non-reentrant mutual-exclusion lock with FIFO handoff
///
/// The sequence of acquirers alternates acquire/release, and contended
/// acquisitions are served in FIFO order: a release hands ownership
/// directly to the queue head.
#[derive(Clone)]
pub struct Lock {
    inner: Arc<LockInner>,
}

impl Lock {
    /// Create a controlled lock
    pub fn new(rt: &Runtime) -> Self {
        Self {
            inner: Arc::new(LockInner {
                resource: rt.scheduler().create_resource(),
                state: Mutex::new(LockState {
                    owner: None,
                    granted: None,
                }),
            }),
        }
    }

    /// Acquire the lock, blocking in FIFO order while it is held
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
                    scheduler.touch_resource(self.inner.resource, me.as_u64() + 1);
                    return Ok(());
                }
                if state.owner.is_none() && state.granted.is_none() {
                    state.owner = Some(me);
                    scheduler.touch_resource(self.inner.resource, me.as_u64() + 1);
                    return Ok(());
                }
                if state.owner == Some(me) {
                    return Err(RuntimeError::ResourceMisuse(
                        "lock is not reentrant".to_string(),
                    ));
                }
            }
            // Queue up; the releasing owner hands the lock over directly.
            scheduler.block_on_resource(self.inner.resource)?;
        }
    }

    /// Release the lock, handing it to the first waiter if any
    pub fn release(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        let me = scheduler.current_operation()?;

        {
            let mut state = self.inner.state.lock();
            if state.owner != Some(me) {
                return Err(RuntimeError::ResourceMisuse(
                    "releasing a lock the caller does not hold".to_string(),
                ));
            }
            state.owner = None;
        }
        // No other operation can run between the state update and the
        // handoff below: the caller still holds the schedule.
        let woken = scheduler.signal_resource(self.inner.resource, 1)?;
        if let Some(&next) = woken.first() {
            self.inner.state.lock().granted = Some(next);
            scheduler.touch_resource(self.inner.resource, next.as_u64() + 1);
        } else {
            scheduler.touch_resource(self.inner.resource, 0);
        }
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        Ok(())
    }

    /// Whether some operation currently holds the lock
    pub fn is_held(&self) -> bool {
        let state = self.inner.state.lock();
        state.owner.is_some() || state.granted.is_some()
    }
}
