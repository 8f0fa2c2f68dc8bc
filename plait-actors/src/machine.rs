//! State machines layered on the actor dispatch loop
//!
//! A state machine declares its states as data: per-state entry/exit
//! actions, event handlers, and defer/ignore sets. At runtime the states
//! form a stack: `push` layers a state over the current one without
//! exiting it, `pop` returns to the parent, and `goto` replaces the top.
//! Event lookup walks the stack top to bottom, so pushed states inherit
//! the handlers of the states below them.
//!
//! After every transition the machine recomputes the effective
//! defer/ignore policy (first mention in stack order wins) and installs
//! it on the mailbox, which is what makes a deferred event eligible again
//! the moment a transition stops deferring it.

use std::collections::BTreeMap;

use tracing::debug;

use crate::actor::{ActorContext, Behavior};
use crate::error::{ActorError, ActorResult};
use crate::event::Event;

/// Per-event handler: mutates the machine, may send/raise/halt via the
/// context
pub type Handler<M> = fn(&mut M, &mut ActorContext<'_>, &Event) -> ActorResult<()>;

/// Entry/exit action
pub type StateAction<M> = fn(&mut M, &mut ActorContext<'_>) -> ActorResult<()>;

/// What a state does with an event
pub enum EventAction<M: ?Sized> {
    /// Run a handler and stay in the current state
    Do(Handler<M>),
    /// Exit the current state and enter another
    Goto(&'static str),
    /// Run a handler, then transition
    DoThenGoto(Handler<M>, &'static str),
    /// Push a state over the current one without exiting it
    Push(&'static str),
    /// Pop back to the parent state
    Pop,
}

// Manual impls: the variants hold only fn pointers and static strings,
// which are Copy regardless of `M`.
impl<M: ?Sized> Clone for EventAction<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: ?Sized> Copy for EventAction<M> {}

/// Declaration of one state
pub struct StateDecl<M: ?Sized> {
    /// State name; must be unique within the machine
    pub name: &'static str,
    /// Runs when the state is entered (goto target or push)
    pub entry: Option<StateAction<M>>,
    /// Runs when the state is exited (goto source or pop)
    pub exit: Option<StateAction<M>>,
    /// Event name to action
    pub handlers: Vec<(&'static str, EventAction<M>)>,
    /// Events left in the mailbox while this state is on top
    pub defers: Vec<&'static str>,
    /// Events silently discarded while this state is on top
    pub ignores: Vec<&'static str>,
}

impl<M: ?Sized> StateDecl<M> {
    /// A state with no actions or handlers
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entry: None,
            exit: None,
            handlers: Vec::new(),
            defers: Vec::new(),
            ignores: Vec::new(),
        }
    }

    /// Attach an entry action
    pub fn with_entry(mut self, action: StateAction<M>) -> Self {
        self.entry = Some(action);
        self
    }

    /// Attach an exit action
    pub fn with_exit(mut self, action: StateAction<M>) -> Self {
        self.exit = Some(action);
        self
    }

    /// Map an event to an action
    pub fn on(mut self, event: &'static str, action: EventAction<M>) -> Self {
        self.handlers.push((event, action));
        self
    }

    /// Defer an event while this state is on top
    pub fn defer(mut self, event: &'static str) -> Self {
        self.defers.push(event);
        self
    }

    /// Ignore an event while this state is on top
    pub fn ignore(mut self, event: &'static str) -> Self {
        self.ignores.push(event);
        self
    }
}

/// An actor whose behavior is a declarative state machine
pub trait StateMachine: Send + 'static {
    /// The state entered when the machine starts
    fn initial_state(&self) -> &'static str;

    /// Every state the machine can be in
    fn states(&self) -> Vec<StateDecl<Self>>
    where
        Self: Sized;

    /// Hook run before the initial state is entered
    fn on_init(&mut self, _ctx: &mut ActorContext<'_>, _event: &Event) -> ActorResult<()> {
        Ok(())
    }
}

/// How the stack treats an event, first mention top-down wins
enum Lookup<M: ?Sized> {
    Action(EventAction<M>),
    Swallow,
    Unhandled,
}

/// Drives a [`StateMachine`] through the actor dispatch loop
pub(crate) struct MachineRunner<M: StateMachine> {
    machine: M,
    decls: Vec<StateDecl<M>>,
    index: BTreeMap<&'static str, usize>,
    /// Indices into `decls`; last element is the current state
    stack: Vec<usize>,
}

impl<M: StateMachine> MachineRunner<M> {
    pub(crate) fn new(machine: M) -> ActorResult<Self> {
        let decls = machine.states();
        let mut index = BTreeMap::new();
        for (i, decl) in decls.iter().enumerate() {
            index.insert(decl.name, i);
        }

        // Every transition target and the initial state must exist.
        let mut targets: Vec<&'static str> = vec![machine.initial_state()];
        for decl in &decls {
            for (_, action) in &decl.handlers {
                match action {
                    EventAction::Goto(target)
                    | EventAction::DoThenGoto(_, target)
                    | EventAction::Push(target) => targets.push(target),
                    EventAction::Do(_) | EventAction::Pop => {}
                }
            }
        }
        for target in targets {
            if !index.contains_key(target) {
                return Err(ActorError::UnknownState {
                    state: target.to_string(),
                });
            }
        }

        Ok(Self {
            machine,
            decls,
            index,
            stack: Vec::new(),
        })
    }

    fn state_index(&self, name: &'static str) -> ActorResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ActorError::UnknownState {
                state: name.to_string(),
            })
    }

    fn current_name(&self) -> &'static str {
        self.stack
            .last()
            .map(|&i| self.decls[i].name)
            .unwrap_or("<uninitialized>")
    }

    /// First mention of the event walking the stack top to bottom
    fn lookup(&self, event: &str) -> Lookup<M> {
        for &state in self.stack.iter().rev() {
            let decl = &self.decls[state];
            if let Some((_, action)) = decl.handlers.iter().find(|(name, _)| *name == event) {
                return Lookup::Action(*action);
            }
            if decl
                .defers
                .iter()
                .chain(decl.ignores.iter())
                .any(|name| *name == event)
            {
                // Policy desync (e.g. an event pulled past the policy by
                // a receive): drop rather than misreport as unhandled.
                return Lookup::Swallow;
            }
        }
        Lookup::Unhandled
    }

    /// Effective defer/ignore sets for the current stack, installed on
    /// the mailbox
    fn install_policy(&self, ctx: &ActorContext<'_>) {
        enum Mention {
            Handled,
            Deferred,
            Ignored,
        }
        let mut mentions: BTreeMap<String, Mention> = BTreeMap::new();
        for &state in self.stack.iter().rev() {
            let decl = &self.decls[state];
            for (name, _) in &decl.handlers {
                mentions
                    .entry((*name).to_string())
                    .or_insert(Mention::Handled);
            }
            for name in &decl.defers {
                mentions
                    .entry((*name).to_string())
                    .or_insert(Mention::Deferred);
            }
            for name in &decl.ignores {
                mentions
                    .entry((*name).to_string())
                    .or_insert(Mention::Ignored);
            }
        }

        let mut deferred = std::collections::BTreeSet::new();
        let mut ignored = std::collections::BTreeSet::new();
        for (name, mention) in mentions {
            match mention {
                Mention::Deferred => {
                    deferred.insert(name);
                }
                Mention::Ignored => {
                    ignored.insert(name);
                }
                Mention::Handled => {}
            }
        }
        ctx.queue().set_policy(deferred, ignored);
    }

    fn enter(&mut self, ctx: &mut ActorContext<'_>, name: &'static str) -> ActorResult<()> {
        let state = self.state_index(name)?;
        self.stack.push(state);
        debug!(state = name, "state entered");
        if let Some(entry) = self.decls[state].entry {
            entry(&mut self.machine, ctx)?;
        }
        self.install_policy(ctx);
        Ok(())
    }

    fn exit_top(&mut self, ctx: &mut ActorContext<'_>) -> ActorResult<usize> {
        let state = self
            .stack
            .pop()
            .ok_or(ActorError::StackUnderflow { actor: ctx.id() })?;
        if let Some(exit) = self.decls[state].exit {
            exit(&mut self.machine, ctx)?;
        }
        Ok(state)
    }

    fn goto(&mut self, ctx: &mut ActorContext<'_>, target: &'static str) -> ActorResult<()> {
        self.exit_top(ctx)?;
        self.enter(ctx, target)
    }

    fn pop(&mut self, ctx: &mut ActorContext<'_>) -> ActorResult<()> {
        self.exit_top(ctx)?;
        if self.stack.is_empty() {
            return Err(ActorError::StackUnderflow { actor: ctx.id() });
        }
        // The revealed state's entry action does not re-run.
        self.install_policy(ctx);
        Ok(())
    }

    fn dispatch(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()> {
        match self.lookup(&event.name) {
            Lookup::Action(EventAction::Do(handler)) => handler(&mut self.machine, ctx, event),
            Lookup::Action(EventAction::Goto(target)) => self.goto(ctx, target),
            Lookup::Action(EventAction::DoThenGoto(handler, target)) => {
                handler(&mut self.machine, ctx, event)?;
                self.goto(ctx, target)
            }
            Lookup::Action(EventAction::Push(target)) => self.enter(ctx, target),
            Lookup::Action(EventAction::Pop) => self.pop(ctx),
            Lookup::Swallow => Ok(()),
            Lookup::Unhandled => Err(ActorError::UnhandledEvent {
                actor: ctx.id(),
                state: self.current_name().to_string(),
                event: event.name.clone(),
            }),
        }
    }
}

impl<M: StateMachine> Behavior for MachineRunner<M> {
    fn init(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()> {
        self.machine.on_init(ctx, event)?;
        let initial = self.machine.initial_state();
        self.enter(ctx, initial)?;
        // Dispatch the creation event only if some state can see it;
        // otherwise it is consumed by initialization.
        match self.lookup(&event.name) {
            Lookup::Unhandled => Ok(()),
            _ => self.dispatch(ctx, event),
        }
    }

    fn handle(&mut self, ctx: &mut ActorContext<'_>, event: &Event) -> ActorResult<()> {
        self.dispatch(ctx, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Toggle;

    impl StateMachine for Toggle {
        fn initial_state(&self) -> &'static str {
            "Off"
        }

        fn states(&self) -> Vec<StateDecl<Self>> {
            vec![
                StateDecl::new("Off").on("flip", EventAction::Goto("On")),
                StateDecl::new("On")
                    .on("flip", EventAction::Goto("Off"))
                    .defer("audit")
                    .ignore("noise"),
            ]
        }
    }

    #[test]
    fn test_runner_validates_states() {
        assert!(MachineRunner::new(Toggle).is_ok());
    }

    struct BadTarget;

    impl StateMachine for BadTarget {
        fn initial_state(&self) -> &'static str {
            "Only"
        }

        fn states(&self) -> Vec<StateDecl<Self>> {
            vec![StateDecl::new("Only").on("go", EventAction::Goto("Nowhere"))]
        }
    }

    #[test]
    fn test_runner_rejects_unknown_transition_target() {
        match MachineRunner::new(BadTarget) {
            Err(ActorError::UnknownState { state }) => assert_eq!(state, "Nowhere"),
            other => panic!("expected unknown state, got ok={}", other.is_ok()),
        }
    }

    #[test]
    fn test_lookup_walks_the_stack() {
        let mut runner = MachineRunner::new(Toggle).unwrap();
        runner.stack.push(runner.index["Off"]);
        assert!(matches!(runner.lookup("flip"), Lookup::Action(_)));
        assert!(matches!(runner.lookup("unknown"), Lookup::Unhandled));

        // Push "On" over "Off": its defer/ignore mentions are found first.
        runner.stack.push(runner.index["On"]);
        assert!(matches!(runner.lookup("audit"), Lookup::Swallow));
        assert!(matches!(runner.lookup("noise"), Lookup::Swallow));
    }
}
