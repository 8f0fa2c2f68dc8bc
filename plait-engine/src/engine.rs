//! The testing engine: iteration driver
//!
//! One run drives many iterations of the same entry point, each under a
//! fresh scheduler, runtime, actor system, and monitor set, with the
//! shared exploration strategy advancing between iterations. The first
//! bug stops the run unless exhaustive mode is set.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use plait_actors::{ActorSystem, MonitorRegistry, SpecificationMonitor};
use plait_config::{validate_config, Configuration, StrategyKind};
use plait_runtime::{
    Failure, IterationOutcome, RewrittenMarker, Runtime, RuntimeResult, Scheduler,
    SchedulerSettings, SharedStrategy, TaskFailure,
};
use plait_strategies::{build_strategy, ExecutionTrace, ExplorationStrategy, TraceFile};

use crate::error::{EngineError, EngineResult};
use crate::report::{render_readable, BugReport, RunStats, TestReport};

/// Everything an entry point needs: the controlled runtime and the actor
/// system layered on it
#[derive(Clone)]
pub struct TestContext {
    /// The controlled runtime
    pub runtime: Runtime,
    /// The actor system of this iteration
    pub actors: ActorSystem,
}

type Entry = Arc<dyn Fn(&TestContext) -> RuntimeResult<()> + Send + Sync>;
type MonitorFactory = Arc<dyn Fn(&MonitorRegistry) + Send + Sync>;

/// Top-level driver for one test run
pub struct TestingEngine {
    config: Configuration,
    entry: Entry,
    monitor_factories: Vec<MonitorFactory>,
    marker: Option<RewrittenMarker>,
}

impl TestingEngine {
    /// Create an engine for a test entry point
    pub fn new<F>(config: Configuration, entry: F) -> Self
    where
        F: Fn(&TestContext) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        Self {
            config,
            entry: Arc::new(entry),
            monitor_factories: Vec::new(),
            marker: None,
        }
    }

    /// Declare the entry point as rewritten
    pub fn with_marker(mut self, marker: RewrittenMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Register a specification monitor type; a fresh instance observes
    /// every iteration
    pub fn with_monitor<M: SpecificationMonitor + Default>(mut self) -> Self {
        self.monitor_factories
            .push(Arc::new(|registry: &MonitorRegistry| {
                registry.register(M::default());
            }));
        self
    }

    /// Explore interleavings until a bug, the iteration budget, the
    /// timeout, or strategy exhaustion
    pub fn run(&self) -> EngineResult<TestReport> {
        self.run_with_replay(None)
    }

    /// Replay a persisted trace once and report its outcome
    pub fn replay(&self, trace: TraceFile) -> EngineResult<TestReport> {
        self.run_with_replay(Some(trace))
    }

    fn run_with_replay(&self, replay: Option<TraceFile>) -> EngineResult<TestReport> {
        let mut config = self.config.clone();
        if replay.is_some() {
            config.strategy = StrategyKind::Replay;
            config.max_iterations = 1;
        }
        validate_config(&config)?;
        self.check_marker(&config)?;

        let strategy = build_strategy(&config, replay)?;
        let shared: SharedStrategy = Arc::new(Mutex::new(strategy));
        let strategy_description = shared.lock().description();

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = config.timeout().map(|budget| start + budget);
        info!(%run_id, strategy = %strategy_description, seed = config.seed, "test run started");

        let mut report = TestReport {
            run_id,
            strategy: strategy_description,
            seed: config.seed,
            started_at,
            elapsed_ms: 0,
            iterations: 0,
            bugs: Vec::new(),
            max_steps_hint: false,
            stats: RunStats::default(),
        };
        let mut last_trace = ExecutionTrace::new();
        let mut fuzzing_mode = false;

        for iteration in 0..config.max_iterations {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(iteration, "run timeout reached");
                    break;
                }
            }
            if !shared.lock().initialize_next_iteration(iteration, &last_trace) {
                debug!(iteration, "strategy exhausted the search space");
                break;
            }

            let (outcome, trace, operations, stats) =
                self.run_iteration(&config, &shared, iteration, fuzzing_mode, deadline)?;
            report.iterations += 1;
            report.stats.total_decisions += stats.decisions;
            report.stats.total_operations += stats.operations_created;
            report.stats.max_concurrency = report.stats.max_concurrency.max(stats.max_runnable);
            last_trace = trace;

            match outcome {
                IterationOutcome::Ok => {}
                IterationOutcome::MaxStepsReached => {
                    report.max_steps_hint = true;
                }
                IterationOutcome::Failed(failure) => {
                    let uncontrolled =
                        matches!(failure, Failure::UncontrolledConcurrency { .. });
                    if uncontrolled && config.systematic_fuzzing_fallback && !fuzzing_mode {
                        // Degrade instead of reporting: later iterations
                        // randomize delays rather than controlling order.
                        warn!(iteration, "uncontrolled concurrency; falling back to delay fuzzing");
                        fuzzing_mode = true;
                        continue;
                    }

                    info!(iteration, kind = failure.kind(), "bug found");
                    let seed = config.seed.wrapping_add(iteration);
                    let trace_file =
                        TraceFile::new(shared.lock().description(), seed, &last_trace);
                    let trace_json = trace_file
                        .to_json()
                        .map_err(|e| EngineError::Internal(e.to_string()))?;
                    report.bugs.push(BugReport {
                        iteration,
                        seed,
                        failure,
                        trace_json,
                        readable_trace: render_readable(&operations, &last_trace),
                    });
                    if !config.exhaustive {
                        break;
                    }
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(%run_id, bugs = report.bugs.len(), iterations = report.iterations, "test run finished");
        Ok(report)
    }

    /// Drive a single iteration to its outcome
    #[allow(clippy::type_complexity)]
    fn run_iteration(
        &self,
        config: &Configuration,
        shared: &SharedStrategy,
        iteration: u64,
        fuzzing_mode: bool,
        deadline: Option<Instant>,
    ) -> EngineResult<(
        IterationOutcome,
        ExecutionTrace,
        Vec<(u64, String, plait_runtime::OperationStatus)>,
        plait_runtime::SchedulerStats,
    )> {
        let settings = SchedulerSettings {
            liveness_checking: config.is_liveness_checking_enabled,
            fingerprinting: config.fingerprinting,
            ..SchedulerSettings::default()
        };
        let scheduler = if fuzzing_mode {
            Scheduler::new_fuzzing(shared.clone(), settings, config.seed.wrapping_add(iteration))
        } else {
            Scheduler::new(shared.clone(), settings)
        };

        let runtime = Runtime::new(scheduler.clone());
        let actors = ActorSystem::new(runtime.clone());
        let registry = actors.monitors().clone();
        for factory in &self.monitor_factories {
            factory(&registry);
        }
        {
            let probe = registry.clone();
            scheduler.set_liveness_probe(Box::new(move || probe.hot_monitor()));
        }

        let context = TestContext {
            runtime: runtime.clone(),
            actors,
        };
        let entry = self.entry.clone();
        let root = runtime
            .spawn_named("root", move |_rt| entry(&context))
            .map_err(|e| EngineError::Internal(format!("failed to start iteration: {}", e)))?;

        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let mut outcome = scheduler.wait_for_completion(remaining);
        scheduler.join_threads();

        if let Some(message) = scheduler.internal_error() {
            return Err(EngineError::Internal(message));
        }

        // An entry point that returns an error (rather than panicking or
        // asserting) still fails the iteration.
        if outcome == IterationOutcome::Ok {
            if let Some(TaskFailure::Faulted { message }) = root.peek_failure() {
                outcome = IterationOutcome::Failed(Failure::UnhandledException {
                    exception: "entry-error".to_string(),
                    message,
                    backtrace: None,
                });
            }
        }
        debug!(iteration, outcome = ?outcome, "iteration finished");

        Ok((
            outcome,
            scheduler.trace_snapshot(),
            scheduler.operations_snapshot(),
            scheduler.stats(),
        ))
    }

    fn check_marker(&self, config: &Configuration) -> EngineResult<()> {
        match self.marker {
            Some(marker) if marker.is_compatible() => Ok(()),
            Some(_) => Err(EngineError::NotRewritten),
            None if config.strict_rewritten_check => Err(EngineError::NotRewritten),
            None => {
                warn!("running without a rewritten marker; interleavings may be incomplete");
                Ok(())
            }
        }
    }
}

/// Install a console tracing subscriber honoring the configured verbosity
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(config: &Configuration) {
    let filter = match config.verbosity {
        plait_config::Verbosity::Quiet => "warn",
        plait_config::Verbosity::Normal => "info",
        plait_config::Verbosity::Detailed => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .try_init();
}
