//! Specification monitors
//!
//! A monitor is a passive state machine observing the test from outside:
//! user code (or actors) notify it synchronously, it never blocks, and it
//! makes no scheduling decisions. States carry a temperature: a `Hot`
//! state is an unmet liveness obligation, and a monitor still hot when an
//! iteration ends (or when the step budget is exhausted) is a liveness
//! violation. `Cold` and `Neutral` states are safe.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::event::Event;

/// Liveness temperature of a monitor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Temperature {
    /// A pending liveness obligation
    Hot,
    /// A satisfied liveness obligation
    Cold,
    /// No liveness meaning
    Neutral,
}

/// What a monitor does with an observed event
pub enum MonitorAction<M: ?Sized> {
    /// Mutate the monitor; stay in the current state
    Do(fn(&mut M, &Event)),
    /// Transition to another state
    Goto(&'static str),
    /// Mutate, then transition
    DoThenGoto(fn(&mut M, &Event), &'static str),
}

impl<M: ?Sized> Clone for MonitorAction<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: ?Sized> Copy for MonitorAction<M> {}

/// Declaration of one monitor state
pub struct MonitorStateDecl<M: ?Sized> {
    /// State name; unique within the monitor
    pub name: &'static str,
    /// Liveness temperature
    pub temperature: Temperature,
    /// Event name to action
    pub handlers: Vec<(&'static str, MonitorAction<M>)>,
}

impl<M: ?Sized> MonitorStateDecl<M> {
    /// A neutral state with no handlers
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            temperature: Temperature::Neutral,
            handlers: Vec::new(),
        }
    }

    /// Mark the state hot (pending liveness obligation)
    pub fn hot(mut self) -> Self {
        self.temperature = Temperature::Hot;
        self
    }

    /// Mark the state cold (satisfied liveness obligation)
    pub fn cold(mut self) -> Self {
        self.temperature = Temperature::Cold;
        self
    }

    /// Map an observed event to an action
    pub fn on(mut self, event: &'static str, action: MonitorAction<M>) -> Self {
        self.handlers.push((event, action));
        self
    }
}

/// A specification automaton observing the global event stream
///
/// Events the current state does not mention are ignored; monitors watch
/// for what matters to them and stay silent otherwise.
pub trait SpecificationMonitor: Send + 'static {
    /// Monitor name used in reports
    fn name(&self) -> &'static str;

    /// The state the monitor starts in
    fn initial_state(&self) -> &'static str;

    /// Every state of the monitor
    fn states(&self) -> Vec<MonitorStateDecl<Self>>
    where
        Self: Sized;
}

trait MonitorCell: Send {
    fn notify(&mut self, event: &Event);
    fn name(&self) -> &str;
    fn current_state(&self) -> &'static str;
    fn temperature(&self) -> Temperature;
}

struct MonitorInstance<M: SpecificationMonitor> {
    monitor: M,
    decls: Vec<MonitorStateDecl<M>>,
    index: BTreeMap<&'static str, usize>,
    current: usize,
}

impl<M: SpecificationMonitor> MonitorInstance<M> {
    fn new(monitor: M) -> Self {
        let decls = monitor.states();
        let mut index = BTreeMap::new();
        for (i, decl) in decls.iter().enumerate() {
            index.insert(decl.name, i);
        }
        let current = index
            .get(monitor.initial_state())
            .copied()
            .unwrap_or_default();
        Self {
            monitor,
            decls,
            index,
            current,
        }
    }

    fn transition(&mut self, target: &'static str) {
        if let Some(&next) = self.index.get(target) {
            debug!(
                monitor = self.monitor.name(),
                from = self.decls[self.current].name,
                to = target,
                "monitor transition"
            );
            self.current = next;
        }
    }
}

impl<M: SpecificationMonitor> MonitorCell for MonitorInstance<M> {
    fn notify(&mut self, event: &Event) {
        let action = self.decls[self.current]
            .handlers
            .iter()
            .find(|(name, _)| *name == event.name)
            .map(|(_, action)| *action);
        match action {
            Some(MonitorAction::Do(handler)) => handler(&mut self.monitor, event),
            Some(MonitorAction::Goto(target)) => self.transition(target),
            Some(MonitorAction::DoThenGoto(handler, target)) => {
                handler(&mut self.monitor, event);
                self.transition(target);
            }
            None => {}
        }
    }

    fn name(&self) -> &str {
        self.monitor.name()
    }

    fn current_state(&self) -> &'static str {
        self.decls[self.current].name
    }

    fn temperature(&self) -> Temperature {
        self.decls[self.current].temperature
    }
}

/// Registry of every monitor observing one iteration; cheap to clone
#[derive(Clone, Default)]
pub struct MonitorRegistry {
    monitors: Arc<Mutex<Vec<Box<dyn MonitorCell>>>>,
}

impl MonitorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monitor instance; registration order is part of the
    /// deterministic iteration setup
    pub fn register<M: SpecificationMonitor>(&self, monitor: M) {
        let mut monitors = self.monitors.lock();
        monitors.push(Box::new(MonitorInstance::new(monitor)));
    }

    /// Notify every monitor synchronously
    pub fn notify(&self, event: &Event) {
        let mut monitors = self.monitors.lock();
        for monitor in monitors.iter_mut() {
            monitor.notify(event);
        }
    }

    /// The first monitor currently in a hot state, with that state's name
    pub fn hot_monitor(&self) -> Option<(String, String)> {
        let monitors = self.monitors.lock();
        monitors
            .iter()
            .find(|m| m.temperature() == Temperature::Hot)
            .map(|m| (m.name().to_string(), m.current_state().to_string()))
    }

    /// Current state of every monitor, for reports
    pub fn states(&self) -> Vec<(String, String)> {
        let monitors = self.monitors.lock();
        monitors
            .iter()
            .map(|m| (m.name().to_string(), m.current_state().to_string()))
            .collect()
    }

    /// Number of registered monitors
    pub fn len(&self) -> usize {
        self.monitors.lock().len()
    }

    /// Whether no monitors are registered
    pub fn is_empty(&self) -> bool {
        self.monitors.lock().is_empty()
    }

    /// Fold monitor states into a scheduler fingerprint
    pub fn fingerprint(&self, hasher: &mut DefaultHasher) {
        let monitors = self.monitors.lock();
        for monitor in monitors.iter() {
            monitor.current_state().hash(hasher);
            monitor.temperature().hash(hasher);
        }
    }
}
