//! Report file round trips: the JSON trace written next to a bug report
//! replays to the same outcome after going through the filesystem

use std::sync::Arc;

use parking_lot::Mutex;

use plait_config::Configuration;
use plait_engine::TestingEngine;
use plait_runtime::{Failure, RewrittenMarker};
use plait_strategies::TraceFile;

fn racy_engine(config: Configuration) -> TestingEngine {
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
        rt.assert(total == 2, "lost update")?;
        Ok(())
    })
}

#[test]
fn bug_trace_round_trips_through_a_file() {
    let config = Configuration {
        max_iterations: 200,
        seed: 2,
        ..Configuration::default()
    };
    let report = racy_engine(config.clone()).run().unwrap();
    assert!(report.found_bug());

    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("bug-trace.json");
    let report_path = dir.path().join("report.json");
    std::fs::write(&trace_path, &report.bugs[0].trace_json).unwrap();
    std::fs::write(&report_path, report.to_json().unwrap()).unwrap();

    let loaded = TraceFile::from_json(&std::fs::read_to_string(&trace_path).unwrap()).unwrap();
    let replayed = racy_engine(config).replay(loaded).unwrap();
    assert!(replayed.found_bug());
    assert!(matches!(
        replayed.bugs[0].failure,
        Failure::AssertionFailure { .. }
    ));
}

#[test]
fn strict_mode_requires_a_marker() {
    let config = Configuration {
        strict_rewritten_check: true,
        ..Configuration::default()
    };
    let error = TestingEngine::new(config.clone(), |_ctx| Ok(()))
        .run()
        .unwrap_err();
    assert_eq!(error.exit_code(), 3);

    // The same entry point with a current marker runs fine.
    let report = TestingEngine::new(config, |_ctx| Ok(()))
        .with_marker(RewrittenMarker::current())
        .run()
        .unwrap();
    assert!(!report.found_bug());
}
