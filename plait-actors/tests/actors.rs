//! End-to-end actor and state-machine tests driven through the scheduler

use std::sync::Arc;

use parking_lot::Mutex;

use plait_actors::{
    Actor, ActorContext, ActorResult, ActorSystem, Event, EventAction, StateDecl, StateMachine,
};
use plait_runtime::{
    IterationOutcome, Runtime, RuntimeResult, Scheduler, SchedulerSettings, SharedStrategy,
};
use plait_strategies::{ExecutionTrace, ExplorationStrategy, RandomStrategy};

fn run_with_seed<F>(seed: u64, entry: F) -> IterationOutcome
where
    F: FnOnce(&Runtime, &ActorSystem) -> RuntimeResult<()> + Send + 'static,
{
    let mut strategy = RandomStrategy::new(seed, 100_000);
    strategy.initialize_next_iteration(0, &ExecutionTrace::new());
    let shared: SharedStrategy = Arc::new(Mutex::new(Box::new(strategy)));
    let scheduler = Scheduler::new(shared, SchedulerSettings::default());
    let runtime = Runtime::new(scheduler.clone());
    let system = ActorSystem::new(runtime.clone());
    runtime
        .spawn_named("root", move |rt| entry(rt, &system))
        .unwrap();
    let outcome = scheduler.wait_for_completion(None);
    scheduler.join_threads();
    outcome
}

struct Counter {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Actor for Counter {
    fn on_event(&mut self, _ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()> {
        self.seen.lock().push(event.name.clone());
        Ok(())
    }
}

#[test]
fn actor_processes_events_in_fifo_order() {
    for seed in 0..10 {
        let outcome = run_with_seed(seed, |rt, system| {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let actor = system.create_actor("counter", Counter { seen: seen.clone() }, None)?;

            for name in ["one", "two", "three"] {
                system.send_event(actor, Event::new(name))?;
            }

            // Drain: wait until the handler has seen everything.
            while seen.lock().len() < 2 {
                rt.yield_now()?;
            }
            // The first event goes to on_init (default: consumed), so the
            // handler records the remaining two in order.
            rt.assert(
                *seen.lock() == vec!["two".to_string(), "three".to_string()],
                "events processed in order",
            )?;
            Ok(())
        });
        assert_eq!(outcome, IterationOutcome::Ok, "seed {}", seed);
    }
}

struct Halter;

impl Actor for Halter {
    fn on_event(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()> {
        if event.name == "stop" {
            ctx.halt();
        }
        Ok(())
    }
}

#[test]
fn halted_actor_drops_later_events() {
    let outcome = run_with_seed(4, |rt, system| {
        let actor = system.create_actor("halter", Halter, Some(Event::new("boot")))?;
        system.send_event(actor, Event::new("stop"))?;

        // Let the handler run the stop event.
        for _ in 0..32 {
            rt.yield_now()?;
        }
        // Further sends are accepted and dropped.
        system.send_event(actor, Event::new("ignored"))?;
        Ok(())
    });
    assert_eq!(outcome, IterationOutcome::Ok);
}

/// Scenario: state S1 defers `work`; a `switch` moves to S2, which
/// processes the deferred `work` event.
struct Deferring {
    order: Arc<Mutex<Vec<String>>>,
}

impl Deferring {
    fn record(machine: &mut Self, _ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()> {
        machine.order.lock().push(event.name.clone());
        Ok(())
    }
}

impl StateMachine for Deferring {
    fn initial_state(&self) -> &'static str {
        "S1"
    }

    fn states(&self) -> Vec<StateDecl<Self>> {
        vec![
            StateDecl::new("S1")
                .defer("work")
                .on("start", EventAction::Do(Self::record))
                .on("switch", EventAction::DoThenGoto(Self::record, "S2")),
            StateDecl::new("S2").on("work", EventAction::Do(Self::record)),
        ]
    }
}

#[test]
fn deferred_event_is_handled_after_the_transition() {
    for seed in 0..10 {
        let outcome = run_with_seed(seed, |rt, system| {
            let order = Arc::new(Mutex::new(Vec::new()));
            let machine = system.create_state_machine(
                "deferring",
                Deferring {
                    order: order.clone(),
                },
                Some(Event::new("start")),
            )?;

            // `work` arrives while S1 defers it; `switch` arrives later.
            system.send_event(machine, Event::new("work"))?;
            system.send_event(machine, Event::new("switch"))?;

            while order.lock().len() < 3 {
                rt.yield_now()?;
            }
            rt.assert(
                *order.lock()
                    == vec![
                        "start".to_string(),
                        "switch".to_string(),
                        "work".to_string(),
                    ],
                "deferred event processed after the switch",
            )?;
            Ok(())
        });
        assert_eq!(outcome, IterationOutcome::Ok, "seed {}", seed);
    }
}

/// Push/pop inheritance: the pushed state pops on `back`, and the parent
/// handles `ping` both before and after.
struct Stacked {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl StateMachine for Stacked {
    fn initial_state(&self) -> &'static str {
        "Parent"
    }

    fn states(&self) -> Vec<StateDecl<Self>> {
        vec![
            StateDecl::new("Parent")
                .on("ping", EventAction::Do(|m: &mut Self, _, _| {
                    m.log.lock().push("parent-ping");
                    Ok(())
                }))
                .on("descend", EventAction::Push("Child")),
            StateDecl::new("Child")
                .on("back", EventAction::Pop)
                .on("child-only", EventAction::Do(|m: &mut Self, _, _| {
                    m.log.lock().push("child-only");
                    Ok(())
                })),
        ]
    }
}

#[test]
fn pushed_state_inherits_parent_handlers() {
    let outcome = run_with_seed(9, |rt, system| {
        let log = Arc::new(Mutex::new(Vec::new()));
        let machine =
            system.create_state_machine("stacked", Stacked { log: log.clone() }, None)?;

        system.send_event(machine, Event::new("descend"))?;
        // Handled by Parent through the stack while Child is on top.
        system.send_event(machine, Event::new("ping"))?;
        system.send_event(machine, Event::new("child-only"))?;
        system.send_event(machine, Event::new("back"))?;
        system.send_event(machine, Event::new("ping"))?;

        while log.lock().len() < 3 {
            rt.yield_now()?;
        }
        rt.assert(
            *log.lock() == vec!["parent-ping", "child-only", "parent-ping"],
            "inherited handlers ran",
        )?;
        Ok(())
    });
    assert_eq!(outcome, IterationOutcome::Ok);
}

struct Requester;

impl Actor for Requester {
    fn on_init(&mut self, ctx: &mut ActorContext<'_>, _event: &Event) -> ActorResult<()> {
        // Park until the reply arrives, then record it via payload check.
        let reply = ctx.receive(&["reply"])?;
        if reply.payload["value"] != 42 {
            ctx.runtime().assert(false, "wrong reply payload")?;
        }
        Ok(())
    }

    fn on_event(&mut self, _ctx: &mut ActorContext<'_>, _event: &Event) -> ActorResult<()> {
        Ok(())
    }
}

#[test]
fn receive_parks_until_a_matching_event_arrives() {
    for seed in 0..10 {
        let outcome = run_with_seed(seed, |rt, system| {
            let actor = system.create_actor("requester", Requester, Some(Event::new("go")))?;

            // The requester is (eventually) parked in receive; this send
            // matches its pending receive and wakes it directly.
            system.send_event(
                actor,
                Event::with_payload("reply", serde_json::json!({"value": 42})),
            )?;

            for _ in 0..16 {
                rt.yield_now()?;
            }
            Ok(())
        });
        assert_eq!(outcome, IterationOutcome::Ok, "seed {}", seed);
    }
}

struct Unhandled;

impl StateMachine for Unhandled {
    fn initial_state(&self) -> &'static str {
        "Only"
    }

    fn states(&self) -> Vec<StateDecl<Self>> {
        vec![StateDecl::new("Only")]
    }
}

#[test]
fn unhandled_event_is_reported_as_a_bug() {
    let outcome = run_with_seed(2, |rt, system| {
        // The creation event is consumed by initialization; the second
        // event goes through dispatch and nothing handles it.
        let machine = system.create_state_machine("strict", Unhandled, Some(Event::new("boot")))?;
        system.send_event(machine, Event::new("surprise"))?;
        for _ in 0..32 {
            rt.yield_now()?;
        }
        Ok(())
    });
    match outcome {
        IterationOutcome::Failed(plait_runtime::Failure::UnhandledException {
            message, ..
        }) => {
            assert!(message.contains("surprise"), "message was {}", message);
        }
        other => panic!("expected unhandled-event bug, got {:?}", other),
    }
}
