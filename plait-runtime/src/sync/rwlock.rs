//! Controlled reader-writer lock
//!
//! Readers coexist; a writer is exclusive. When a release finds both
//! reader and writer waiters queued, the direction of the handoff is a
//! nondeterministic choice resolved by the exploration strategy, so both
//! reader-preferring and writer-preferring schedules are explored.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RuntimeError, RuntimeResult};
use crate::operation::{OperationId, ResourceId};
use crate::runtime::Runtime;
use crate::scheduler::SchedulePoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Read,
    Write,
}

struct RwState {
    writer: Option<OperationId>,
    readers: BTreeSet<OperationId>,
    /// What each queued waiter wants
    intents: BTreeMap<OperationId, Intent>,
    granted_readers: BTreeSet<OperationId>,
    granted_writer: Option<OperationId>,
}

struct RwInner {
    resource: ResourceId,
    state: Mutex<RwState>,
}

/// Reader-writer lock with strategy-resolved contention
#[derive(Clone)]
pub struct RwLock {
    inner: Arc<RwInner>,
}

impl RwLock {
    /// Create a controlled reader-writer lock
    pub fn new(rt: &Runtime) -> Self {
        Self {
            inner: Arc::new(RwInner {
                resource: rt.scheduler().create_resource(),
                state: Mutex::new(RwState {
                    writer: None,
                    readers: BTreeSet::new(),
                    intents: BTreeMap::new(),
                    granted_readers: BTreeSet::new(),
                    granted_writer: None,
                }),
            }),
        }
    }

    /// Acquire shared access
    pub fn acquire_read(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        let me = scheduler.current_operation()?;

        loop {
            {
                let mut state = self.inner.state.lock();
                if state.granted_readers.remove(&me) {
                    state.readers.insert(me);
                    state.intents.remove(&me);
                    Self::touch(scheduler, &state, self.inner.resource);
                    return Ok(());
                }
                if state.readers.contains(&me) {
                    return Err(RuntimeError::ResourceMisuse(
                        "reader lock is not reentrant".to_string(),
                    ));
                }
                if state.writer.is_none() && state.granted_writer.is_none() {
                    state.readers.insert(me);
                    Self::touch(scheduler, &state, self.inner.resource);
                    return Ok(());
                }
                state.intents.insert(me, Intent::Read);
            }
            scheduler.block_on_resource(self.inner.resource)?;
        }
    }

    /// Acquire exclusive access
    pub fn acquire_write(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        let me = scheduler.current_operation()?;

        loop {
            {
                let mut state = self.inner.state.lock();
                if state.granted_writer == Some(me) {
                    state.granted_writer = None;
                    state.writer = Some(me);
                    state.intents.remove(&me);
                    Self::touch(scheduler, &state, self.inner.resource);
                    return Ok(());
                }
                if state.writer == Some(me) {
                    return Err(RuntimeError::ResourceMisuse(
                        "writer lock is not reentrant".to_string(),
                    ));
                }
                if state.writer.is_none()
                    && state.readers.is_empty()
                    && state.granted_writer.is_none()
                    && state.granted_readers.is_empty()
                {
                    state.writer = Some(me);
                    Self::touch(scheduler, &state, self.inner.resource);
                    return Ok(());
                }
                state.intents.insert(me, Intent::Write);
            }
            scheduler.block_on_resource(self.inner.resource)?;
        }
    }

    /// Release shared access; the last reader out hands the lock on
    pub fn release_read(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        let me = scheduler.current_operation()?;
        let last_reader = {
            let mut state = self.inner.state.lock();
            if !state.readers.remove(&me) {
                return Err(RuntimeError::ResourceMisuse(
                    "releasing a reader lock the caller does not hold".to_string(),
                ));
            }
            Self::touch(scheduler, &state, self.inner.resource);
            state.readers.is_empty() && state.granted_readers.is_empty()
        };
        if last_reader {
            self.hand_over(rt)?;
        }
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        Ok(())
    }

    /// Release exclusive access and hand the lock on
    pub fn release_write(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        let me = scheduler.current_operation()?;
        {
            let mut state = self.inner.state.lock();
            if state.writer != Some(me) {
                return Err(RuntimeError::ResourceMisuse(
                    "releasing a writer lock the caller does not hold".to_string(),
                ));
            }
            state.writer = None;
            Self::touch(scheduler, &state, self.inner.resource);
        }
        self.hand_over(rt)?;
        scheduler.scheduling_point(SchedulePoint::Resource)?;
        Ok(())
    }

    /// Grant the lock to queued waiters: all readers, or the first
    /// writer, with contended direction resolved by the strategy
    fn hand_over(&self, rt: &Runtime) -> RuntimeResult<()> {
        let scheduler = rt.scheduler();
        let queue = scheduler.resource_waiters(self.inner.resource);
        if queue.is_empty() {
            return Ok(());
        }

        let (first_writer, waiting_readers) = {
            let state = self.inner.state.lock();
            let first_writer = queue
                .iter()
                .copied()
                .find(|op| state.intents.get(op) == Some(&Intent::Write));
            let waiting_readers: Vec<OperationId> = queue
                .iter()
                .copied()
                .filter(|op| state.intents.get(op) == Some(&Intent::Read))
                .collect();
            (first_writer, waiting_readers)
        };

        let favor_writer = match (first_writer, waiting_readers.is_empty()) {
            (Some(_), true) => true,
            (None, _) => false,
            // Both classes queued: the strategy decides the direction.
            (Some(_), false) => scheduler.next_bool()?,
        };

        if favor_writer {
            if let Some(writer) = first_writer {
                self.inner.state.lock().granted_writer = Some(writer);
                scheduler.wake_waiter(self.inner.resource, writer)?;
            }
        } else {
            {
                let mut state = self.inner.state.lock();
                for &reader in &waiting_readers {
                    state.granted_readers.insert(reader);
                }
            }
            for reader in waiting_readers {
                scheduler.wake_waiter(self.inner.resource, reader)?;
            }
        }
        Ok(())
    }

    fn touch(scheduler: &crate::scheduler::Scheduler, state: &RwState, resource: ResourceId) {
        let tag = (state.writer.map(|w| w.as_u64() + 1).unwrap_or(0) << 32)
            | state.readers.len() as u64;
        scheduler.touch_resource(resource, tag);
    }

    /// Number of current readers
    pub fn reader_count(&self) -> usize {
        self.inner.state.lock().readers.len()
    }

    /// Whether a writer currently holds the lock
    pub fn has_writer(&self) -> bool {
        let state = self.inner.state.lock();
        state.writer.is_some() || state.granted_writer.is_some()
    }
}
