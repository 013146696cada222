//! Machine declarations - the input contract consumed by the registry.
//!
//! A [`MachineDecl`] describes one state machine: its states (each with a
//! factory and transition/action/timeout bindings) and its machine-wide
//! timer events. How a declaration is produced (hand-written, generated,
//! emitted by some higher-level tool) is up to the caller; the registry only
//! requires that it is well formed.
//!
//! States are identified by their Rust type. Each state declares a factory
//! that produces its runtime instance; the engine constructs that instance
//! lazily on first entry and caches it for the machine's lifetime, so a
//! value returned by a transition acts purely as a type witness.

use crate::state::{StateId, StateKind};
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// A boxed state instance.
pub type BoxedState = Box<dyn Any + Send>;

/// A boxed event value.
pub type BoxedEvent = Box<dyn Any + Send>;

pub(crate) type StateFactoryFn<M> = Arc<dyn Fn(&mut M) -> BoxedState + Send + Sync>;
pub(crate) type TransitionFn =
    Arc<dyn Fn(&mut (dyn Any + Send), &(dyn Any + Send)) -> Option<BoxedState> + Send + Sync>;
pub(crate) type ActionFn<M> = Arc<dyn Fn(&mut (dyn Any + Send), &mut M) + Send + Sync>;
pub(crate) type TimeoutFn = Arc<dyn Fn(&mut (dyn Any + Send)) -> BoxedState + Send + Sync>;
pub(crate) type EventFactoryFn = Arc<dyn Fn() -> BoxedEvent + Send + Sync>;

/// When an action runs relative to its owning state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionPhase {
    /// On every event delivered while the owning state is current, before
    /// transition resolution.
    Implied,
    /// Once, when the owning state is entered.
    OnEnter,
    /// Once, when the owning state is exited.
    OnExit,
}

/// Whether an action takes only the state, or the state and the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionArity {
    Plain,
    WithMachine,
}

/// A transition rule: matches one concrete event type, runs a guard/producer
/// callable that either yields the next state (transition taken) or `None`
/// (guard rejected, stay put).
#[derive(Clone)]
pub struct TransitionBinding {
    event: TypeId,
    event_name: &'static str,
    run: TransitionFn,
}

impl std::fmt::Debug for TransitionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionBinding")
            .field("event", &self.event_name)
            .finish_non_exhaustive()
    }
}

impl TransitionBinding {
    pub fn event_type(&self) -> TypeId {
        self.event
    }

    pub fn event_name(&self) -> &'static str {
        self.event_name
    }

    /// Invokes the transition with the current state instance and the event.
    pub fn invoke(&self, state: &mut (dyn Any + Send), event: &(dyn Any + Send)) -> Option<BoxedState> {
        (self.run)(state, event)
    }
}

/// An entry/exit/implied action bound to a state.
pub struct ActionBinding<M> {
    phase: ActionPhase,
    arity: ActionArity,
    run: ActionFn<M>,
}

impl<M> Clone for ActionBinding<M> {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            arity: self.arity,
            run: Arc::clone(&self.run),
        }
    }
}

impl<M> ActionBinding<M> {
    pub fn phase(&self) -> ActionPhase {
        self.phase
    }

    pub fn arity(&self) -> ActionArity {
        self.arity
    }

    pub fn invoke(&self, state: &mut (dyn Any + Send), machine: &mut M) {
        (self.run)(state, machine)
    }
}

/// A transition triggered by dwell time rather than an external event.
///
/// Armed when the owning state becomes current, cancelled when it is exited.
/// The target is declared up front so the registry can validate it at build
/// time; a timeout firing always resolves to that target.
#[derive(Clone)]
pub struct TimeoutBinding {
    period: Duration,
    target: StateId,
    run: TimeoutFn,
}

impl TimeoutBinding {
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn target(&self) -> StateId {
        self.target
    }

    /// Produces the next state instance from the timed-out state.
    pub fn invoke(&self, state: &mut (dyn Any + Send)) -> BoxedState {
        (self.run)(state)
    }
}

/// Schedule of a machine-wide timer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSchedule {
    /// Fires every `period`, starting `delay` after engine start.
    FixedRate { delay: Duration, period: Duration },
    /// Fires once, `delay` after engine start.
    OneShot { delay: Duration },
}

/// Declaration of a machine-wide synthetic timer event, active for the
/// whole machine lifetime and independent of the current state.
#[derive(Clone)]
pub struct TimerDecl {
    schedule: TimerSchedule,
    scope: Option<String>,
    event_name: &'static str,
    make_event: EventFactoryFn,
}

impl TimerDecl {
    /// A timer that fires repeatedly at a fixed rate.
    pub fn fixed_rate<E, F>(delay: Duration, period: Duration, make_event: F) -> Self
    where
        E: Any + Send,
        F: Fn() -> E + Send + Sync + 'static,
    {
        Self {
            schedule: TimerSchedule::FixedRate { delay, period },
            scope: None,
            event_name: std::any::type_name::<E>(),
            make_event: Arc::new(move || Box::new(make_event()) as BoxedEvent),
        }
    }

    /// A timer that fires exactly once after `delay`.
    pub fn once<E, F>(delay: Duration, make_event: F) -> Self
    where
        E: Any + Send,
        F: Fn() -> E + Send + Sync + 'static,
    {
        Self {
            schedule: TimerSchedule::OneShot { delay },
            scope: None,
            event_name: std::any::type_name::<E>(),
            make_event: Arc::new(move || Box::new(make_event()) as BoxedEvent),
        }
    }

    /// Restricts this timer to machines with the given name.
    pub fn scoped(mut self, machine: impl Into<String>) -> Self {
        self.scope = Some(machine.into());
        self
    }

    pub fn schedule(&self) -> TimerSchedule {
        self.schedule
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn event_name(&self) -> &'static str {
        self.event_name
    }

    /// Builds a fresh event value for one firing.
    pub fn make_event(&self) -> BoxedEvent {
        (self.make_event)()
    }
}

/// Erased form of a state declaration, as stored inside a [`MachineDecl`].
pub(crate) struct StateDef<M> {
    pub(crate) id: StateId,
    pub(crate) kind: StateKind,
    pub(crate) scope: Option<String>,
    pub(crate) factory: StateFactoryFn<M>,
    pub(crate) transitions: Vec<TransitionBinding>,
    pub(crate) actions: Vec<ActionBinding<M>>,
    pub(crate) timeouts: Vec<TimeoutBinding>,
}

/// Declaration of one state of type `S` belonging to a machine of type `M`.
///
/// The factory receives the machine so a state can capture shared handles
/// out of it at construction time.
pub struct StateDecl<M, S> {
    def: StateDef<M>,
    _state: PhantomData<fn(S)>,
}

impl<M: Send + 'static, S: Any + Send> StateDecl<M, S> {
    fn with_kind<F>(kind: StateKind, factory: F) -> Self
    where
        F: Fn(&mut M) -> S + Send + Sync + 'static,
    {
        Self {
            def: StateDef {
                id: StateId::of::<S>(),
                kind,
                scope: None,
                factory: Arc::new(move |machine| Box::new(factory(machine)) as BoxedState),
                transitions: Vec::new(),
                actions: Vec::new(),
                timeouts: Vec::new(),
            },
            _state: PhantomData,
        }
    }

    /// Declares the machine's start state.
    pub fn start<F>(factory: F) -> Self
    where
        F: Fn(&mut M) -> S + Send + Sync + 'static,
    {
        Self::with_kind(StateKind::Start, factory)
    }

    /// Declares an ordinary state.
    pub fn normal<F>(factory: F) -> Self
    where
        F: Fn(&mut M) -> S + Send + Sync + 'static,
    {
        Self::with_kind(StateKind::Normal, factory)
    }

    /// Restricts this state to machines with the given name. Unscoped
    /// states belong to whichever machine declares them.
    pub fn scoped(mut self, machine: impl Into<String>) -> Self {
        self.def.scope = Some(machine.into());
        self
    }

    /// Adds a transition accepting events of type `E`. Returning `None`
    /// rejects the event (guard); returning `Some(next)` moves the machine
    /// to the state named by `next`'s type.
    pub fn on_event<E, N, F>(mut self, transition: F) -> Self
    where
        E: Any + Send,
        N: Any + Send,
        F: Fn(&mut S, &E) -> Option<N> + Send + Sync + 'static,
    {
        self.def.transitions.push(TransitionBinding {
            event: TypeId::of::<E>(),
            event_name: std::any::type_name::<E>(),
            run: Arc::new(move |state, event| {
                let state = state
                    .downcast_mut::<S>()
                    .expect("state instance type mismatch");
                let event = event.downcast_ref::<E>().expect("event type mismatch");
                transition(state, event).map(|next| Box::new(next) as BoxedState)
            }),
        });
        self
    }

    /// Like [`on_event`](Self::on_event) but the callable picks the target
    /// dynamically, returning any boxed state value. The returned type must
    /// still be a declared state; an unrecognized type is an unrecoverable
    /// engine fault at runtime.
    pub fn on_event_dyn<E, F>(mut self, transition: F) -> Self
    where
        E: Any + Send,
        F: Fn(&mut S, &E) -> Option<BoxedState> + Send + Sync + 'static,
    {
        self.def.transitions.push(TransitionBinding {
            event: TypeId::of::<E>(),
            event_name: std::any::type_name::<E>(),
            run: Arc::new(move |state, event| {
                let state = state
                    .downcast_mut::<S>()
                    .expect("state instance type mismatch");
                let event = event.downcast_ref::<E>().expect("event type mismatch");
                transition(state, event)
            }),
        });
        self
    }

    fn action<F>(mut self, phase: ActionPhase, arity: ActionArity, run: F) -> Self
    where
        F: Fn(&mut (dyn Any + Send), &mut M) + Send + Sync + 'static,
    {
        self.def.actions.push(ActionBinding {
            phase,
            arity,
            run: Arc::new(run),
        });
        self
    }

    /// Runs on every event delivered while this state is current.
    pub fn implied<F>(self, action: F) -> Self
    where
        F: Fn(&mut S) + Send + Sync + 'static,
    {
        self.action(ActionPhase::Implied, ActionArity::Plain, move |state, _| {
            action(state.downcast_mut::<S>().expect("state instance type mismatch"))
        })
    }

    /// Implied action that also receives the machine.
    pub fn implied_with<F>(self, action: F) -> Self
    where
        F: Fn(&mut S, &mut M) + Send + Sync + 'static,
    {
        self.action(
            ActionPhase::Implied,
            ActionArity::WithMachine,
            move |state, machine| {
                action(
                    state.downcast_mut::<S>().expect("state instance type mismatch"),
                    machine,
                )
            },
        )
    }

    /// Runs once when this state is entered.
    pub fn on_enter<F>(self, action: F) -> Self
    where
        F: Fn(&mut S) + Send + Sync + 'static,
    {
        self.action(ActionPhase::OnEnter, ActionArity::Plain, move |state, _| {
            action(state.downcast_mut::<S>().expect("state instance type mismatch"))
        })
    }

    /// Entry action that also receives the machine.
    pub fn on_enter_with<F>(self, action: F) -> Self
    where
        F: Fn(&mut S, &mut M) + Send + Sync + 'static,
    {
        self.action(
            ActionPhase::OnEnter,
            ActionArity::WithMachine,
            move |state, machine| {
                action(
                    state.downcast_mut::<S>().expect("state instance type mismatch"),
                    machine,
                )
            },
        )
    }

    /// Runs once when this state is exited.
    pub fn on_exit<F>(self, action: F) -> Self
    where
        F: Fn(&mut S) + Send + Sync + 'static,
    {
        self.action(ActionPhase::OnExit, ActionArity::Plain, move |state, _| {
            action(state.downcast_mut::<S>().expect("state instance type mismatch"))
        })
    }

    /// Exit action that also receives the machine.
    pub fn on_exit_with<F>(self, action: F) -> Self
    where
        F: Fn(&mut S, &mut M) + Send + Sync + 'static,
    {
        self.action(
            ActionPhase::OnExit,
            ActionArity::WithMachine,
            move |state, machine| {
                action(
                    state.downcast_mut::<S>().expect("state instance type mismatch"),
                    machine,
                )
            },
        )
    }

    /// Adds a timeout transition: after `period` in this state with no exit,
    /// the machine moves to the state produced by `transition`.
    pub fn timeout<N, F>(mut self, period: Duration, transition: F) -> Self
    where
        N: Any + Send,
        F: Fn(&mut S) -> N + Send + Sync + 'static,
    {
        self.def.timeouts.push(TimeoutBinding {
            period,
            target: StateId::of::<N>(),
            run: Arc::new(move |state| {
                let state = state
                    .downcast_mut::<S>()
                    .expect("state instance type mismatch");
                Box::new(transition(state)) as BoxedState
            }),
        });
        self
    }
}

/// Declaration of a whole machine: the registry input contract.
pub struct MachineDecl<M> {
    name: String,
    states: Vec<StateDef<M>>,
    timers: Vec<TimerDecl>,
}

impl<M: Send + 'static> MachineDecl<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            timers: Vec::new(),
        }
    }

    /// Adds a state declaration.
    pub fn state<S: Any + Send>(mut self, decl: StateDecl<M, S>) -> Self {
        self.states.push(decl.def);
        self
    }

    /// Adds a machine-wide timer event.
    pub fn timer(mut self, decl: TimerDecl) -> Self {
        self.timers.push(decl);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, Vec<StateDef<M>>, Vec<TimerDecl>) {
        (self.name, self.states, self.timers)
    }
}
