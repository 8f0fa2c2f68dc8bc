//! Property tests for trace persistence

use proptest::prelude::*;

use plait_strategies::{Decision, ExecutionTrace, OperationId, ReplayStrategy, TraceFile};
use plait_strategies::ExplorationStrategy;

fn arb_decision() -> impl Strategy<Value = Decision> {
    prop_oneof![
        (0u64..64).prop_map(|op| Decision::ScheduleOp { op }),
        any::<bool>().prop_map(|value| Decision::Bool { value }),
        (1u32..256).prop_flat_map(|bound| {
            (0..bound).prop_map(move |value| Decision::Int { value, bound })
        }),
        any::<u64>().prop_map(|fingerprint| Decision::Hash { fingerprint }),
    ]
}

#[test]
fn trace_survives_a_file_round_trip() {
    let mut trace = ExecutionTrace::new();
    trace.record_scheduled(OperationId(0));
    trace.record_int(3, 8);
    trace.record_scheduled(OperationId(1));
    let file = TraceFile::new("pct:4", 99, &trace);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.json");
    std::fs::write(&path, file.to_json().unwrap()).unwrap();

    let loaded = TraceFile::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded, file);
}

proptest! {
    #[test]
    fn trace_json_round_trip(decisions in prop::collection::vec(arb_decision(), 0..128), seed in any::<u64>()) {
        let trace: ExecutionTrace = decisions.iter().copied().collect();
        let file = TraceFile::new("random", seed, &trace);

        let json = file.to_json().unwrap();
        let parsed = TraceFile::from_json(&json).unwrap();

        prop_assert_eq!(&parsed, &file);
        prop_assert_eq!(parsed.to_trace(), trace);
    }

    #[test]
    fn replay_reproduces_scheduling_decisions(ops in prop::collection::vec(0u64..4, 1..64)) {
        let mut trace = ExecutionTrace::new();
        for &op in &ops {
            trace.record_scheduled(OperationId(op));
        }

        let mut replay = ReplayStrategy::from_trace(&trace);
        prop_assert!(replay.initialize_next_iteration(0, &ExecutionTrace::new()));

        let enabled: Vec<OperationId> = (0..4).map(OperationId).collect();
        for &op in &ops {
            let choice = replay.next_operation(&enabled, OperationId(0), false).unwrap();
            prop_assert_eq!(choice, Some(OperationId(op)));
        }
    }
}
