//! Controlled synchronization primitives
//!
//! Each primitive wraps a scheduler resource plus its own small state
//! (owner, count, flags). Blocking and waking always go through the
//! scheduler, never through OS synchronization, so every acquisition
//! order the primitives allow is an order the exploration strategy chose.
//!
//! Ownership handoff is direct: a release that finds waiters grants the
//! primitive to the FIFO head before waking it, so no operation can barge
//! in between a release and the corresponding wake.

pub mod event;
pub mod lock;
pub mod monitor;
pub mod rwlock;
pub mod semaphore;

pub use event::ManualResetEvent;
pub use lock::Lock;
pub use monitor::Monitor;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
