//! Actors and the actor system
//!
//! An actor is a single-consumer event loop: events accumulate in its
//! mailbox, and while events are pending exactly one handler operation
//! drains them one at a time. The handler operation ends when the mailbox
//! runs dry and a fresh one is spawned by the next enqueue, so actor
//! concurrency is expressed entirely through operations the scheduler
//! already controls.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use plait_runtime::{Failure, Runtime, RuntimeError, RuntimeResult, SchedulePoint};

use crate::error::{ActorError, ActorResult};
use crate::event::{ActorId, Event};
use crate::machine::{MachineRunner, StateMachine};
use crate::mailbox::{DequeueResult, EnqueueResult, EventQueue, ReceivePredicate};
use crate::monitor::MonitorRegistry;

/// A plain event-driven actor
///
/// The first event an actor ever receives is delivered to `on_init`;
/// every later event goes to `on_event`.
pub trait Actor: Send + 'static {
    /// Handle the creation event
    fn on_init(&mut self, _ctx: &mut ActorContext<'_>, _event: &Event) -> ActorResult<()> {
        Ok(())
    }

    /// Handle one event
    fn on_event(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()>;
}

/// Object-safe dispatch surface shared by plain actors and state machines
pub(crate) trait Behavior: Send {
    fn init(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()>;
    fn handle(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()>;
}

struct PlainBehavior<A: Actor> {
    actor: A,
}

impl<A: Actor> Behavior for PlainBehavior<A> {
    fn init(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()> {
        self.actor.on_init(ctx, event)
    }

    fn handle(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()> {
        self.actor.on_event(ctx, event)
    }
}

struct BehaviorCell {
    behavior: Option<Box<dyn Behavior>>,
    initialized: bool,
}

#[derive(Clone)]
struct ActorSlot {
    id: ActorId,
    name: String,
    queue: EventQueue,
    cell: Arc<Mutex<BehaviorCell>>,
}

struct SystemInner {
    actors: Mutex<BTreeMap<ActorId, ActorSlot>>,
    next_actor: Mutex<u64>,
    monitors: MonitorRegistry,
}

/// Owner of every actor in one iteration; cheap to clone
#[derive(Clone)]
pub struct ActorSystem {
    runtime: Runtime,
    inner: Arc<SystemInner>,
}

impl ActorSystem {
    /// Create an actor system bound to a controlled runtime
    ///
    /// Mailbox sizes are registered as a fingerprint source so livelock
    /// heuristics observe event-queue growth.
    pub fn new(runtime: Runtime) -> Self {
        let system = Self {
            runtime: runtime.clone(),
            inner: Arc::new(SystemInner {
                actors: Mutex::new(BTreeMap::new()),
                next_actor: Mutex::new(0),
                monitors: MonitorRegistry::new(),
            }),
        };
        let weak = Arc::downgrade(&system.inner);
        runtime.scheduler().add_fingerprint_source(Box::new(move |hasher| {
            use std::hash::Hash;
            if let Some(inner) = weak.upgrade() {
                for (id, slot) in inner.actors.lock().iter() {
                    id.0.hash(hasher);
                    slot.queue.len().hash(hasher);
                    slot.queue.is_halted().hash(hasher);
                }
                inner.monitors.fingerprint(hasher);
            }
        }));
        system
    }

    /// The controlled runtime this system runs on
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The monitor registry observing this system
    pub fn monitors(&self) -> &MonitorRegistry {
        &self.inner.monitors
    }

    /// Create a plain actor; the optional creation event is delivered to
    /// `on_init`
    pub fn create_actor<A: Actor>(
        &self,
        name: &str,
        actor: A,
        init: Option<Event>,
    ) -> RuntimeResult<ActorId> {
        self.register(name, Box::new(PlainBehavior { actor }), init)
    }

    /// Create a state-machine actor; the optional creation event is
    /// dispatched through the initial state after its entry action
    pub fn create_state_machine<M: StateMachine>(
        &self,
        name: &str,
        machine: M,
        init: Option<Event>,
    ) -> RuntimeResult<ActorId> {
        let runner = MachineRunner::new(machine)
            .map_err(|e| RuntimeError::ResourceMisuse(e.to_string()))?;
        self.register(name, Box::new(runner), init)
    }

    fn register(
        &self,
        name: &str,
        behavior: Box<dyn Behavior>,
        init: Option<Event>,
    ) -> RuntimeResult<ActorId> {
        let id = {
            let mut next = self.inner.next_actor.lock();
            let id = ActorId(*next);
            *next += 1;
            id
        };
        let slot = ActorSlot {
            id,
            name: name.to_string(),
            queue: EventQueue::new(),
            cell: Arc::new(Mutex::new(BehaviorCell {
                behavior: Some(behavior),
                initialized: false,
            })),
        };
        self.inner.actors.lock().insert(id, slot);
        debug!(actor = id.0, name, "actor created");

        if let Some(event) = init {
            self.send_event(id, event)?;
        }
        Ok(id)
    }

    /// Send an event to an actor; a scheduling point
    pub fn send_event(&self, to: ActorId, event: Event) -> RuntimeResult<()> {
        let slot = self
            .inner
            .actors
            .lock()
            .get(&to)
            .cloned()
            .ok_or_else(|| RuntimeError::ResourceMisuse(ActorError::UnknownActor(to).to_string()))?;

        match slot.queue.enqueue(&self.runtime, event)? {
            EnqueueResult::EventHandlerNotRunning => self.spawn_handler(slot)?,
            EnqueueResult::EventHandlerRunning
            | EnqueueResult::Received
            | EnqueueResult::Dropped => {}
        }
        self.runtime
            .scheduler()
            .scheduling_point(SchedulePoint::Mailbox)
    }

    /// Spawn the handler operation that drains the actor's mailbox
    fn spawn_handler(&self, slot: ActorSlot) -> RuntimeResult<()> {
        let system = self.clone();
        let name = format!("{}-handler", slot.name);
        self.runtime
            .spawn_named(&name, move |rt| system.run_batch(rt, slot))?;
        Ok(())
    }

    /// One handler batch: drain the mailbox until it runs dry
    fn run_batch(&self, rt: &Runtime, slot: ActorSlot) -> RuntimeResult<()> {
        let (mut behavior, mut initialized) = {
            let mut cell = slot.cell.lock();
            let behavior = cell
                .behavior
                .take()
                .ok_or_else(|| RuntimeError::Internal("actor behavior already taken".to_string()))?;
            (behavior, cell.initialized)
        };

        let result = self.batch_loop(rt, &slot, behavior.as_mut(), &mut initialized);

        {
            let mut cell = slot.cell.lock();
            cell.behavior = Some(behavior);
            cell.initialized = initialized;
        }

        match result {
            Ok(()) => Ok(()),
            Err(ActorError::Runtime(e)) => Err(e),
            Err(domain) => {
                // Dispatch bugs (unhandled event, unknown state, stack
                // underflow) are test failures, not engine errors.
                rt.scheduler().report_failure(Failure::UnhandledException {
                    exception: "actor-dispatch".to_string(),
                    message: domain.to_string(),
                    backtrace: None,
                });
                Err(RuntimeError::IterationStopped)
            }
        }
    }

    fn batch_loop(
        &self,
        rt: &Runtime,
        slot: &ActorSlot,
        behavior: &mut dyn Behavior,
        initialized: &mut bool,
    ) -> ActorResult<()> {
        loop {
            rt.scheduler().scheduling_point(SchedulePoint::Mailbox)?;
            let event = match slot.queue.dequeue() {
                DequeueResult::Success(event) | DequeueResult::Raised(event) => event,
                DequeueResult::Unavailable | DequeueResult::OnlyDeferred => return Ok(()),
            };

            let mut ctx = ActorContext {
                system: self,
                runtime: rt,
                actor: slot.id,
                queue: &slot.queue,
                halted: false,
            };
            if *initialized {
                behavior.handle(&mut ctx, &event)?;
            } else {
                *initialized = true;
                behavior.init(&mut ctx, &event)?;
            }

            if ctx.halted {
                debug!(actor = slot.id.0, "actor halted");
                slot.queue.halt();
                return Ok(());
            }
        }
    }
}

/// Per-dispatch view an action gets of its actor and the system
pub struct ActorContext<'a> {
    system: &'a ActorSystem,
    runtime: &'a Runtime,
    actor: ActorId,
    queue: &'a EventQueue,
    halted: bool,
}

impl<'a> ActorContext<'a> {
    /// The actor being dispatched
    pub fn id(&self) -> ActorId {
        self.actor
    }

    /// The controlled runtime
    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// Send an event to another actor, stamping this actor as sender
    pub fn send(&self, to: ActorId, event: Event) -> RuntimeResult<()> {
        self.system.send_event(to, event.from_sender(self.actor))
    }

    /// Raise an event against this actor; it is handled before any queued
    /// event, before control returns to the event loop
    pub fn raise(&self, event: Event) {
        self.queue.raise(event);
    }

    /// Park until an event with one of `names` arrives
    pub fn receive(&self, names: &[&str]) -> RuntimeResult<Event> {
        self.queue.receive(self.runtime, names, None)
    }

    /// Park until an event with one of `names` satisfying the predicate
    /// arrives
    pub fn receive_where(
        &self,
        names: &[&str],
        predicate: ReceivePredicate,
    ) -> RuntimeResult<Event> {
        self.queue.receive(self.runtime, names, Some(predicate))
    }

    /// Stop this actor after the current action; remaining and future
    /// events are dropped
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Notify every registered specification monitor synchronously
    pub fn notify_monitor(&self, event: &Event) {
        self.system.monitors().notify(event);
    }

    pub(crate) fn queue(&self) -> &EventQueue {
        self.queue
    }
}
