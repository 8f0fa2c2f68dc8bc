//! Whole-engine scenarios: bugs found, reproduced from traces, and clean
//! runs staying clean

use std::sync::Arc;

use parking_lot::Mutex;

use plait_actors::{Event, MonitorAction, MonitorStateDecl, SpecificationMonitor};
use plait_config::{Configuration, StrategyKind};
use plait_engine::TestingEngine;
use plait_runtime::{when_all, Failure, Lock, ManualResetEvent, Monitor, RuntimeError};
use plait_strategies::TraceFile;

/// Scenario: two operations take two locks in opposite order, with
/// events forcing the cyclic schedule. Every interleaving deadlocks.
fn two_lock_deadlock_engine(config: Configuration) -> TestingEngine {
    TestingEngine::new(config, |ctx| {
        let rt = &ctx.runtime;
        let lock_a = Lock::new(rt);
        let lock_b = Lock::new(rt);
        let a_held = ManualResetEvent::new(rt, false);
        let b_held = ManualResetEvent::new(rt, false);

        let first = {
            let lock_a = lock_a.clone();
            let lock_b = lock_b.clone();
            let a_held = a_held.clone();
            let b_held = b_held.clone();
            rt.spawn_named("first", move |rt| {
                lock_a.acquire(rt)?;
                a_held.set(rt)?;
                b_held.wait(rt)?;
                lock_b.acquire(rt)?;
                lock_b.release(rt)?;
                lock_a.release(rt)
            })?
        };
        let second = rt.spawn_named("second", move |rt| {
            lock_b.acquire(rt)?;
            b_held.set(rt)?;
            a_held.wait(rt)?;
            lock_a.acquire(rt)?;
            lock_a.release(rt)?;
            lock_b.release(rt)
        })?;

        first.join()?;
        second.join()?;
        Ok(())
    })
}

#[test]
fn two_lock_deadlock_is_found_and_replayed() {
    let config = Configuration {
        max_iterations: 1,
        seed: 7,
        ..Configuration::default()
    };
    let report = two_lock_deadlock_engine(config.clone()).run().unwrap();

    assert!(report.found_bug());
    assert_eq!(report.exit_code(), 1);
    let bug = &report.bugs[0];
    match &bug.failure {
        Failure::Deadlock { blocked } => {
            let names: Vec<&str> = blocked.iter().map(|b| b.name.as_str()).collect();
            assert!(names.contains(&"first"));
            assert!(names.contains(&"second"));
        }
        other => panic!("expected deadlock, got {}", other),
    }
    assert!(bug.readable_trace.contains("schedule op"));

    // Replaying the persisted trace reproduces the same deadlock.
    let trace = TraceFile::from_json(&bug.trace_json).unwrap();
    let replay_report = two_lock_deadlock_engine(config).replay(trace).unwrap();
    assert!(replay_report.found_bug());
    assert!(matches!(
        replay_report.bugs[0].failure,
        Failure::Deadlock { .. }
    ));
}

/// Scenario: two operations increment a shared counter without a lock;
/// the lost-update interleaving must show up within the iteration budget.
fn racy_counter_engine(config: Configuration) -> TestingEngine {
    TestingEngine::new(config, |ctx| {
        let rt = &ctx.runtime;
        let counter = Arc::new(Mutex::new(0u32));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let counter = counter.clone();
                rt.spawn_named("incrementer", move |rt| {
                    let read = *counter.lock();
                    rt.yield_now()?;
                    *counter.lock() = read + 1;
                    Ok(())
                })
            })
            .collect::<Result<_, _>>()?;

        for worker in workers {
            worker.join()?;
        }
        let total = *counter.lock();
        rt.assert(total == 2, format!("lost update: counter == {}", total))?;
        Ok(())
    })
}

#[test]
fn racy_counter_assertion_failure_is_found_and_reproducible() {
    let config = Configuration {
        max_iterations: 200,
        seed: 0,
        ..Configuration::default()
    };
    let report = racy_counter_engine(config.clone()).run().unwrap();

    assert!(report.found_bug(), "no interleaving lost an update");
    let bug = &report.bugs[0];
    assert!(matches!(bug.failure, Failure::AssertionFailure { .. }));

    // The same configuration finds the same bug with an identical trace.
    let again = racy_counter_engine(config.clone()).run().unwrap();
    assert_eq!(again.bugs[0].iteration, bug.iteration);
    assert_eq!(again.bugs[0].trace_json, bug.trace_json);

    // Replay reproduces the assertion failure.
    let trace = TraceFile::from_json(&bug.trace_json).unwrap();
    let replayed = racy_counter_engine(config).replay(trace).unwrap();
    assert!(replayed.found_bug());
    assert!(matches!(
        replayed.bugs[0].failure,
        Failure::AssertionFailure { .. }
    ));
}

/// Liveness monitor: hot while submitted work is outstanding.
#[derive(Default)]
struct ProgressMonitor;

impl SpecificationMonitor for ProgressMonitor {
    fn name(&self) -> &'static str {
        "Progress"
    }

    fn initial_state(&self) -> &'static str {
        "Idle"
    }

    fn states(&self) -> Vec<MonitorStateDecl<Self>> {
        vec![
            MonitorStateDecl::new("Idle")
                .cold()
                .on("work-submitted", MonitorAction::Goto("WaitingForWork")),
            MonitorStateDecl::new("WaitingForWork")
                .hot()
                .on("work-done", MonitorAction::Goto("Idle")),
        ]
    }
}

#[test]
fn starved_consumer_is_a_liveness_violation_under_fair_pct() {
    let config = Configuration {
        strategy: StrategyKind::FairPct,
        max_iterations: 1,
        max_fair_steps: 200,
        max_unfair_steps: 1_000,
        seed: 3,
        ..Configuration::default()
    };
    let engine = TestingEngine::new(config, |ctx| {
        ctx.actors.monitors().notify(&Event::new("work-submitted"));
        // The producer that would send `work-done` never runs; the
        // consumer spins until the step budget is gone.
        let consumer = ctx
            .runtime
            .spawn_named("consumer", |rt| -> Result<(), RuntimeError> {
                loop {
                    rt.yield_now()?;
                }
            })?;
        consumer.join()?;
        Ok(())
    })
    .with_monitor::<ProgressMonitor>();

    let report = engine.run().unwrap();
    assert!(report.found_bug());
    match &report.bugs[0].failure {
        Failure::LivenessViolation { monitor, hot_state } => {
            assert_eq!(monitor, "Progress");
            assert_eq!(hot_state, "WaitingForWork");
        }
        other => panic!("expected liveness violation, got {}", other),
    }
}

#[test]
fn served_consumer_leaves_the_monitor_cold() {
    let config = Configuration {
        strategy: StrategyKind::FairPct,
        max_iterations: 1,
        // Switch to the fair random tail early so the spinning consumer
        // cannot starve the producer for the whole budget.
        max_fair_steps: 10_000,
        max_unfair_steps: 50,
        seed: 3,
        ..Configuration::default()
    };
    let engine = TestingEngine::new(config, |ctx| {
        let rt = &ctx.runtime;
        ctx.actors.monitors().notify(&Event::new("work-submitted"));
        let done = Arc::new(Mutex::new(false));

        let consumer = {
            let done = done.clone();
            rt.spawn_named("consumer", move |rt| {
                while !*done.lock() {
                    rt.yield_now()?;
                }
                Ok(())
            })?
        };
        let monitors = ctx.actors.monitors().clone();
        let producer = rt.spawn_named("producer", move |rt| {
            rt.yield_now()?;
            *done.lock() = true;
            monitors.notify(&Event::new("work-done"));
            Ok(())
        })?;

        producer.join()?;
        consumer.join()?;
        Ok(())
    })
    .with_monitor::<ProgressMonitor>();

    let report = engine.run().unwrap();
    assert!(!report.found_bug(), "fair schedule must serve the producer");
}

/// Scenario: pulse_all resumes each of three waiters exactly once.
#[test]
fn pulse_all_resumes_each_waiter_exactly_once() {
    for seed in 0..5 {
        let config = Configuration {
            max_iterations: 1,
            seed,
            ..Configuration::default()
        };
        let engine = TestingEngine::new(config, |ctx| {
            let rt = &ctx.runtime;
            let monitor = Monitor::new(rt);
            let resumed = Arc::new(Mutex::new(Vec::new()));
            let waiting = Arc::new(Mutex::new(0u32));

            let waiters: Vec<_> = (0..3u32)
                .map(|i| {
                    let monitor = monitor.clone();
                    let resumed = resumed.clone();
                    let waiting = waiting.clone();
                    rt.spawn_named("waiter", move |rt| {
                        monitor.acquire(rt)?;
                        *waiting.lock() += 1;
                        monitor.wait(rt)?;
                        resumed.lock().push(i);
                        monitor.release(rt)?;
                        Ok(())
                    })
                })
                .collect::<Result<_, _>>()?;

            loop {
                monitor.acquire(rt)?;
                let ready = *waiting.lock() == 3;
                if ready {
                    monitor.pulse_all(rt)?;
                    monitor.release(rt)?;
                    break;
                }
                monitor.release(rt)?;
                rt.yield_now()?;
            }

            for waiter in waiters {
                waiter.join()?;
            }
            let mut order = resumed.lock().clone();
            rt.assert(order.len() == 3, "every waiter resumed")?;
            order.sort_unstable();
            order.dedup();
            rt.assert(order.len() == 3, "no waiter resumed twice")?;
            Ok(())
        });
        let report = engine.run().unwrap();
        assert!(!report.found_bug(), "seed {}: {:?}", seed, report.bugs.first().map(|b| &b.failure));
    }
}

/// Scenario: canceling a member of a when_all cancels the combination
/// and leaks no operations.
#[test]
fn cancellation_during_when_all_cancels_the_combination() {
    let config = Configuration {
        max_iterations: 1,
        seed: 5,
        ..Configuration::default()
    };
    let engine = TestingEngine::new(config, |ctx| {
        let rt = &ctx.runtime;
        let finisher = rt.spawn_named("finisher", |rt| {
            rt.yield_now()?;
            Ok(())
        })?;
        let victim = rt.spawn_named("victim", |rt| -> Result<(), RuntimeError> {
            loop {
                rt.yield_now()?;
            }
        })?;

        let canceler = victim.clone();
        let combined = when_all(rt, vec![finisher, victim])?;
        canceler.cancel()?;

        match combined.join() {
            Err(RuntimeError::TaskCanceled) => Ok(()),
            Ok(_) => {
                rt.assert(false, "combination completed despite cancellation")?;
                Ok(())
            }
            Err(other) => Err(other),
        }
    });

    // A clean outcome means every operation completed: the scheduler only
    // ends an iteration without a bug once nothing is left running.
    let report = engine.run().unwrap();
    assert!(!report.found_bug(), "{:?}", report.bugs.first().map(|b| &b.failure));
}

/// Identical (strategy, seed, configuration) produce identical traces,
/// even on a clean run.
#[test]
fn identical_configurations_produce_identical_outcomes() {
    let run = || {
        let config = Configuration {
            max_iterations: 3,
            seed: 11,
            ..Configuration::default()
        };
        TestingEngine::new(config, |ctx| {
            let rt = &ctx.runtime;
            let lock = Lock::new(rt);
            let tasks: Vec<_> = (0..3u32)
                .map(|i| {
                    let lock = lock.clone();
                    rt.spawn_named("worker", move |rt| {
                        lock.acquire(rt)?;
                        let coin = rt.choose_bool()?;
                        if coin {
                            rt.yield_now()?;
                        }
                        lock.release(rt)?;
                        Ok(i)
                    })
                })
                .collect::<Result<_, _>>()?;
            for task in tasks {
                task.join()?;
            }
            Ok(())
        })
        .run()
        .unwrap()
    };

    let left = run();
    let right = run();
    assert_eq!(left.iterations, right.iterations);
    assert!(!left.found_bug());
    assert_eq!(left.stats.total_decisions, right.stats.total_decisions);
}

#[test]
fn exhaustive_mode_keeps_counting_bugs() {
    let config = Configuration {
        max_iterations: 40,
        seed: 1,
        exhaustive: true,
        ..Configuration::default()
    };
    let report = racy_counter_engine(config).run().unwrap();
    // Every racy iteration is recorded, not just the first.
    assert!(report.iterations == 40);
    assert!(report.bugs.len() >= 1);
}

#[test]
fn replay_strategy_without_trace_is_a_configuration_error() {
    let config = Configuration {
        strategy: StrategyKind::Replay,
        ..Configuration::default()
    };
    let engine = TestingEngine::new(config, |_ctx| Ok(()));
    let error = engine.run().unwrap_err();
    assert_eq!(error.exit_code(), 4);
}
