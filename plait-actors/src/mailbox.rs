//! Actor mailboxes
//!
//! A mailbox is a FIFO of events plus the per-state defer/ignore policy,
//! a one-slot raised-event buffer, and at most one pending receive. The
//! dequeue policy, in order: the raised event, then the first queued
//! event that is neither deferred nor ignored (ignored events are
//! discarded on the way). A pending receive consumes a matching event at
//! enqueue time, ahead of the queue.
//!
//! Enqueue never mutates the defer set; deferred events become eligible
//! when a state transition installs a policy that no longer defers them.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use plait_runtime::{OperationId, Runtime, RuntimeError, RuntimeResult, SchedulePoint};

use crate::event::Event;

/// Outcome of an enqueue, telling the sender what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The event was queued and no handler is running; the sender must
    /// start one
    EventHandlerNotRunning,
    /// The event was queued behind a running handler
    EventHandlerRunning,
    /// A pending receive matched and consumed the event
    Received,
    /// The mailbox is halted; the event was dropped
    Dropped,
}

/// Outcome of a dequeue
#[derive(Debug, Clone, PartialEq)]
pub enum DequeueResult {
    /// The next eligible queued event
    Success(Event),
    /// The raised event, which takes priority over the queue
    Raised(Event),
    /// The mailbox is empty; the handler stops
    Unavailable,
    /// Only deferred events remain; the handler stops
    OnlyDeferred,
}

/// Predicate a receive applies on top of its event-name set
pub type ReceivePredicate = Box<dyn Fn(&Event) -> bool + Send>;

struct PendingReceive {
    names: BTreeSet<String>,
    predicate: Option<ReceivePredicate>,
    op: OperationId,
    slot: Arc<Mutex<Option<Event>>>,
}

impl PendingReceive {
    fn matches(&self, event: &Event) -> bool {
        self.names.contains(&event.name)
            && self.predicate.as_ref().map(|p| p(event)).unwrap_or(true)
    }
}

struct QueueState {
    queue: VecDeque<Event>,
    raised: Option<Event>,
    deferred: BTreeSet<String>,
    ignored: BTreeSet<String>,
    pending_receive: Option<PendingReceive>,
    handler_running: bool,
    halted: bool,
}

/// Single-consumer event queue for one actor
#[derive(Clone)]
pub struct EventQueue {
    state: Arc<Mutex<QueueState>>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// An empty mailbox with no defer/ignore policy
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                queue: VecDeque::new(),
                raised: None,
                deferred: BTreeSet::new(),
                ignored: BTreeSet::new(),
                pending_receive: None,
                handler_running: false,
                halted: false,
            })),
        }
    }

    /// Deliver an event
    ///
    /// A pending receive has precedence over the queue at the moment of
    /// enqueue: if it matches, the receiver consumes the event directly.
    pub fn enqueue(&self, rt: &Runtime, event: Event) -> RuntimeResult<EnqueueResult> {
        let receiver = {
            let mut state = self.state.lock();
            if state.halted {
                return Ok(EnqueueResult::Dropped);
            }
            let matched = state
                .pending_receive
                .as_ref()
                .map(|pending| pending.matches(&event))
                .unwrap_or(false);
            if matched {
                let pending = state
                    .pending_receive
                    .take()
                    .ok_or_else(|| RuntimeError::Internal("pending receive vanished".into()))?;
                *pending.slot.lock() = Some(event);
                pending.op
            } else {
                trace!(event = %event.name, "event queued");
                state.queue.push_back(event);
                if state.handler_running {
                    return Ok(EnqueueResult::EventHandlerRunning);
                }
                state.handler_running = true;
                return Ok(EnqueueResult::EventHandlerNotRunning);
            }
        };
        // Wake the receiver outside the mailbox lock.
        rt.scheduler().unblock_receive(receiver)?;
        Ok(EnqueueResult::Received)
    }

    /// Pull the next event per the dequeue policy
    ///
    /// When nothing is eligible the handler-running flag is cleared in
    /// the same critical section, so no enqueue can slip between "queue
    /// looked empty" and "handler stopped".
    pub fn dequeue(&self) -> DequeueResult {
        let mut state = self.state.lock();
        if let Some(event) = state.raised.take() {
            return DequeueResult::Raised(event);
        }

        let mut index = 0;
        while index < state.queue.len() {
            let name = &state.queue[index].name;
            if state.ignored.contains(name) {
                state.queue.remove(index);
                continue;
            }
            if state.deferred.contains(name) {
                index += 1;
                continue;
            }
            match state.queue.remove(index) {
                Some(event) => return DequeueResult::Success(event),
                None => break,
            }
        }

        state.handler_running = false;
        if state.queue.is_empty() {
            DequeueResult::Unavailable
        } else {
            DequeueResult::OnlyDeferred
        }
    }

    /// Buffer an event raised from within an action; the next dequeue
    /// returns it ahead of the queue
    pub fn raise(&self, event: Event) {
        let mut state = self.state.lock();
        state.raised = Some(event);
    }

    /// Park the calling handler until an event matching `names` (and the
    /// predicate, if any) is available
    ///
    /// An already-queued matching event is consumed regardless of the
    /// defer policy. Predicates are evaluated exactly once per candidate
    /// event, at match time; events are immutable, so a predicate can
    /// never observe later mutation.
    pub fn receive(
        &self,
        rt: &Runtime,
        names: &[&str],
        predicate: Option<ReceivePredicate>,
    ) -> RuntimeResult<Event> {
        let scheduler = rt.scheduler();
        scheduler.scheduling_point(SchedulePoint::Mailbox)?;
        let me = scheduler.current_operation()?;

        let slot = {
            let mut state = self.state.lock();
            let name_set: BTreeSet<String> = names.iter().map(|n| (*n).to_string()).collect();
            let probe = PendingReceive {
                names: name_set,
                predicate,
                op: me,
                slot: Arc::new(Mutex::new(None)),
            };

            if let Some(index) = state.queue.iter().position(|e| probe.matches(e)) {
                let event = state
                    .queue
                    .remove(index)
                    .ok_or_else(|| RuntimeError::Internal("matched event vanished".into()))?;
                return Ok(event);
            }

            let slot = probe.slot.clone();
            state.pending_receive = Some(probe);
            slot
        };

        scheduler.block_on_receive()?;
        let result = slot.lock().take();
        result.ok_or(RuntimeError::TaskCanceled)
    }

    /// Install the defer/ignore policy of the current state
    pub fn set_policy(&self, deferred: BTreeSet<String>, ignored: BTreeSet<String>) {
        let mut state = self.state.lock();
        state.deferred = deferred;
        state.ignored = ignored;
    }

    /// Drop every queued event and refuse all future ones
    pub fn halt(&self) {
        let mut state = self.state.lock();
        state.halted = true;
        state.queue.clear();
        state.raised = None;
    }

    /// Whether the mailbox has been halted
    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    /// Queued event count (fingerprint input)
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no events are queued
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }
}
