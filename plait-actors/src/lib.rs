//! Event-driven actors on top of the controlled runtime
//!
//! Actors own single-consumer mailboxes whose every enqueue, dequeue, and
//! receive is a scheduling point, so the exploration strategy controls
//! event-delivery interleavings the same way it controls task
//! interleavings. State machines layer entry/exit actions, a state stack
//! with handler inheritance, and defer/ignore policies over the plain
//! actor dispatch loop. Specification monitors observe events
//! synchronously and carry hot/cold states for liveness checking.

pub mod actor;
pub mod error;
pub mod event;
pub mod machine;
pub mod mailbox;
pub mod monitor;

pub use actor::{Actor, ActorContext, ActorSystem};
pub use error::{ActorError, ActorResult};
pub use event::{ActorId, Event};
pub use machine::{EventAction, Handler, StateAction, StateDecl, StateMachine};
pub use mailbox::{DequeueResult, EnqueueResult, EventQueue, ReceivePredicate};
pub use monitor::{
    MonitorAction, MonitorRegistry, MonitorStateDecl, SpecificationMonitor, Temperature,
};
