//! Error types for the actor layer

use thiserror::Error;

use plait_runtime::RuntimeError;

use crate::event::ActorId;

/// Result type for actor operations
pub type ActorResult<T> = Result<T, ActorError>;

/// Error types for actor and state-machine dispatch
///
/// `Runtime` wraps scheduler-level errors so handlers can use `?` on
/// controlled-runtime calls; the remaining variants are dispatch bugs
/// that the event loop reports as test failures.
#[derive(Error, Debug)]
pub enum ActorError {
    /// A controlled-runtime error propagating through a handler
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// No state in the stack handles, defers, or ignores the event
    #[error("actor {actor} in state {state} cannot handle event {event}")]
    UnhandledEvent {
        /// The actor that received the event
        actor: ActorId,
        /// The state stack top at dispatch time
        state: String,
        /// The event name
        event: String,
    },

    /// A transition names a state the machine never declared
    #[error("unknown state {state}")]
    UnknownState {
        /// The undeclared state name
        state: String,
    },

    /// A pop was requested with nothing pushed
    #[error("state stack underflow in actor {actor}")]
    StackUnderflow {
        /// The actor whose stack underflowed
        actor: ActorId,
    },

    /// An event was sent to an actor id that was never created
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),
}
