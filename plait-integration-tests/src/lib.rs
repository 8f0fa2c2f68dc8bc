//! End-to-end scenarios for the PLAIT engine
//!
//! This crate holds no library code: the scenario suite lives in
//! `tests/` and drives whole engine runs (strategy, scheduler, actors,
//! monitors, reporting) through the public APIs of the other workspace
//! members.
