//! Test engine for systematic concurrency testing
//!
//! The engine takes a test entry point written against the controlled
//! runtime and actor layers, explores many interleavings of it under a
//! configurable strategy, and reports any bug together with a replayable
//! trace. A persisted trace can be replayed to reproduce the exact
//! schedule that exposed a bug.
//!
//! ```no_run
//! use plait_config::Configuration;
//! use plait_engine::TestingEngine;
//!
//! let engine = TestingEngine::new(Configuration::default(), |ctx| {
//!     let task = ctx.runtime.spawn(|rt| rt.choose_int(10))?;
//!     let value = task.join()?;
//!     ctx.runtime.assert(value < 10, "bounded choice")?;
//!     Ok(())
//! });
//! let report = engine.run().expect("engine ran");
//! std::process::exit(report.exit_code());
//! ```

pub mod engine;
pub mod error;
pub mod report;

pub use engine::{init_tracing, TestContext, TestingEngine};
pub use error::{EngineError, EngineResult};
pub use report::{render_readable, BugReport, RunStats, TestReport};
