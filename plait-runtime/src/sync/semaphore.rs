//! Controlled counting semaphore

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RuntimeError, RuntimeResult};
use crate::operation::{OperationId, ResourceId};
use crate::runtime::Runtime;
use crate::scheduler::SchedulePoint;

struct SemaphoreState {
    count: u32,
    max_count: u32,
    /// Permits handed directly to specific waiters, not yet consumed
    granted: BTreeSet<OperationId>,
}

struct SemaphoreInner {
    resource: ResourceId,
    state: Mutex<SemaphoreState>,
}

/// Counting semaphore with FIFO permit handoff
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

impl Semaphore {
    /// Create a semaphore with an initial permit count and a maximum
    pub fn new(rt: &Runtime, initial_count: u32, max_count: u32) -> RuntimeResult<Self> {
        if initial_count > max_count {
            return Err(RuntimeError::ResourceMisuse(format!(
                "initial count {} exceeds max count {}",
                initial_count, max_count
            )));
        }
        Ok(Self {
            inner: Arc::new(SemaphoreInner {
                resource: rt.scheduler().create_resource(),
                state: Mutex::new(SemaphoreState {
                    count: initial_count,
                    max_count,
                    granted: BTreeSet::new(),
                }),
            }),
        })
    }

    /// Take a permit, blocking in FIFO order when none are available
    pub fn acquire(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        let me = scheduler.current_operation()?;

        loop {
            {
                let mut state = self.inner.state.lock();
                if state.granted.remove(&me) {
                    // Permit transferred directly by a releaser.
                    scheduler.touch_resource(self.inner.resource, u64::from(state.count));
                    return Ok(());
                }
                if state.count > 0 {
                    state.count -= 1;
                    scheduler.touch_resource(self.inner.resource, u64::from(state.count));
                    return Ok(());
                }
            }
            scheduler.block_on_resource(self.inner.resource)?;
        }
    }

    /// Return a permit; a queued waiter receives it directly
    pub fn release(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        scheduler.current_operation()?;

        let woken = scheduler.signal_resource(self.inner.resource, 1)?;
        {
            let mut state = self.inner.state.lock();
            match woken.first() {
                Some(&waiter) => {
                    state.granted.insert(waiter);
                }
                None => {
                    if state.count >= state.max_count {
                        return Err(RuntimeError::ResourceMisuse(
                            "semaphore released above its maximum count".to_string(),
                        ));
                    }
                    state.count += 1;
                }
            }
            scheduler.touch_resource(self.inner.resource, u64::from(state.count));
        }
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        Ok(())
    }

    /// Currently available permits (excluding in-flight grants)
    pub fn available(&self) -> u32 {
        self.inner.state.lock().count
    }
}
