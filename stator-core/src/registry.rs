//! The resolution registry: indexes a machine declaration once and answers
//! structural queries for the engine.
//!
//! Built eagerly at engine construction; immutable thereafter. Construction
//! performs one pass of structural indexing and validation - it never
//! re-scans.

use crate::decl::{
    ActionBinding, ActionPhase, BoxedState, MachineDecl, StateFactoryFn, TimeoutBinding,
    TimerDecl, TimerSchedule, TransitionBinding,
};
use crate::error::DefinitionError;
use crate::state::StateDescriptor;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Duration;

/// Indexed, validated view of one machine declaration.
pub struct Registry<M> {
    machine_name: String,
    descriptors: HashMap<TypeId, StateDescriptor>,
    factories: HashMap<TypeId, StateFactoryFn<M>>,
    transitions: HashMap<(TypeId, TypeId), Vec<TransitionBinding>>,
    actions: HashMap<(TypeId, ActionPhase), Vec<ActionBinding<M>>>,
    timeouts: HashMap<TypeId, Vec<TimeoutBinding>>,
    timers: Vec<TimerDecl>,
}

impl<M> std::fmt::Debug for Registry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("machine_name", &self.machine_name)
            .field("states", &self.descriptors.len())
            .field("transitions", &self.transitions.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl<M: Send + 'static> Registry<M> {
    /// Indexes and validates a machine declaration.
    pub fn build(decl: MachineDecl<M>) -> Result<Self, DefinitionError> {
        let (machine_name, states, timers) = decl.into_parts();

        if machine_name.is_empty() {
            return Err(DefinitionError::EmptyMachineName);
        }

        let mut descriptors = HashMap::new();
        let mut factories = HashMap::new();
        let mut transitions: HashMap<(TypeId, TypeId), Vec<TransitionBinding>> = HashMap::new();
        let mut actions: HashMap<(TypeId, ActionPhase), Vec<ActionBinding<M>>> = HashMap::new();
        let mut timeouts: HashMap<TypeId, Vec<TimeoutBinding>> = HashMap::new();

        for state in &states {
            let ty = state.id.type_id();
            if descriptors.contains_key(&ty) {
                return Err(DefinitionError::DuplicateState {
                    state: state.id.name(),
                });
            }
            descriptors.insert(
                ty,
                StateDescriptor::new(state.id, state.kind, state.scope.clone()),
            );
        }

        for state in states {
            let ty = state.id.type_id();

            for timeout in &state.timeouts {
                if !descriptors.contains_key(&timeout.target().type_id()) {
                    return Err(DefinitionError::UnknownTimeoutTarget {
                        state: state.id.name(),
                        target: timeout.target().name(),
                    });
                }
            }

            factories.insert(ty, state.factory);
            for transition in state.transitions {
                transitions
                    .entry((ty, transition.event_type()))
                    .or_default()
                    .push(transition);
            }
            for action in state.actions {
                actions.entry((ty, action.phase())).or_default().push(action);
            }
            if !state.timeouts.is_empty() {
                timeouts.insert(ty, state.timeouts);
            }
        }

        // Keep only timers addressed to this machine.
        let mut kept_timers = Vec::new();
        for timer in timers {
            if let TimerSchedule::FixedRate { period, .. } = timer.schedule() {
                if period == Duration::ZERO {
                    return Err(DefinitionError::ZeroTimerPeriod {
                        event: timer.event_name(),
                    });
                }
            }
            match timer.scope() {
                Some(scope) if scope != machine_name => {
                    tracing::debug!(
                        machine = %machine_name,
                        event = timer.event_name(),
                        scope,
                        "skipping timer event scoped to another machine"
                    );
                }
                _ => kept_timers.push(timer),
            }
        }

        tracing::debug!(
            machine = %machine_name,
            states = descriptors.len(),
            transitions = transitions.len(),
            timers = kept_timers.len(),
            "registry built"
        );

        Ok(Self {
            machine_name,
            descriptors,
            factories,
            transitions,
            actions,
            timeouts,
            timers: kept_timers,
        })
    }

    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Resolves the unique start state.
    ///
    /// If more than one state is tagged as start, scoping is used as a
    /// tie-breaker: only candidates explicitly scoped to this machine
    /// survive. Zero survivors or more than one is an error.
    pub fn start_state(&self) -> Result<&StateDescriptor, DefinitionError> {
        let candidates: Vec<&StateDescriptor> =
            self.descriptors.values().filter(|d| d.is_start()).collect();

        match candidates.len() {
            0 => Err(DefinitionError::NoStartState {
                machine: self.machine_name.clone(),
            }),
            1 => Ok(candidates[0]),
            _ => {
                let filtered: Vec<&StateDescriptor> = candidates
                    .into_iter()
                    .filter(|d| d.scope() == Some(self.machine_name.as_str()))
                    .collect();
                match filtered.len() {
                    0 => Err(DefinitionError::NoStartState {
                        machine: self.machine_name.clone(),
                    }),
                    1 => Ok(filtered[0]),
                    _ => Err(DefinitionError::AmbiguousStartState {
                        machine: self.machine_name.clone(),
                        candidates: filtered
                            .iter()
                            .map(|d| d.id().short_name().to_string())
                            .collect(),
                    }),
                }
            }
        }
    }

    /// Resolves the transition for `(state, event)`.
    ///
    /// No match means the event is ignored for that state - guards and
    /// "no applicable transition" are indistinguishable to the caller, and
    /// both mean "stay put". More than one match is a fatal declaration
    /// defect.
    pub fn resolve_transition(
        &self,
        state: TypeId,
        event: TypeId,
    ) -> Result<Option<&TransitionBinding>, DefinitionError> {
        match self.transitions.get(&(state, event)).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([binding]) => Ok(Some(binding)),
            Some(bindings) => Err(DefinitionError::AmbiguousTransition {
                state: self.state_name(state),
                event: bindings[0].event_name().to_string(),
            }),
        }
    }

    /// Looks up the descriptor for a state type, if declared.
    pub fn descriptor(&self, state: TypeId) -> Option<&StateDescriptor> {
        self.descriptors.get(&state)
    }

    /// Typed convenience for [`descriptor`](Self::descriptor).
    pub fn descriptor_of<S: Any>(&self) -> Option<&StateDescriptor> {
        self.descriptor(TypeId::of::<S>())
    }

    /// All action bindings of `phase` for a state, in declaration order.
    pub fn actions_for(&self, state: TypeId, phase: ActionPhase) -> &[ActionBinding<M>] {
        self.actions
            .get(&(state, phase))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Timeout transitions bound to a state.
    pub fn timeouts_for(&self, state: TypeId) -> &[TimeoutBinding] {
        self.timeouts.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Machine-wide timer events addressed to this machine.
    pub fn timer_events(&self) -> &[TimerDecl] {
        &self.timers
    }

    /// Constructs the runtime instance for a state via its declared factory.
    pub fn instantiate(&self, state: TypeId, machine: &mut M) -> Option<BoxedState> {
        self.factories.get(&state).map(|factory| factory(machine))
    }

    /// Iterates over all declared states.
    pub fn states(&self) -> impl Iterator<Item = &StateDescriptor> {
        self.descriptors.values()
    }

    fn state_name(&self, state: TypeId) -> String {
        self.descriptors
            .get(&state)
            .map(|d| d.id().short_name().to_string())
            .unwrap_or_else(|| format!("{:?}", state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::StateDecl;
    use crate::state::{StateId, StateKind};

    #[derive(Default)]
    struct Door {
        openings: u32,
    }

    #[derive(Default)]
    struct Closed;
    #[derive(Default)]
    struct Open;
    #[derive(Default)]
    struct Locked;

    struct Push;
    struct Lock;

    fn door_decl() -> MachineDecl<Door> {
        MachineDecl::new("door")
            .state(
                StateDecl::<Door, Closed>::start(|_| Closed)
                    .on_event(|_s: &mut Closed, _e: &Push| Some(Open))
                    .on_event(|_s: &mut Closed, _e: &Lock| Some(Locked)),
            )
            .state(
                StateDecl::<Door, Open>::normal(|_| Open)
                    .on_event(|_s: &mut Open, _e: &Push| Some(Closed))
                    .on_enter_with(|_s, door: &mut Door| door.openings += 1),
            )
            .state(StateDecl::<Door, Locked>::normal(|_| Locked))
    }

    #[test]
    fn test_build_and_resolve() {
        let registry = Registry::build(door_decl()).unwrap();
        assert_eq!(registry.machine_name(), "door");
        assert_eq!(registry.states().count(), 3);

        let start = registry.start_state().unwrap();
        assert_eq!(start.id(), StateId::of::<Closed>());
        assert_eq!(start.kind(), StateKind::Start);

        let binding = registry
            .resolve_transition(TypeId::of::<Closed>(), TypeId::of::<Push>())
            .unwrap()
            .expect("transition declared");
        assert_eq!(binding.event_type(), TypeId::of::<Push>());

        // No transition on Lock from Open: stay put, not an error.
        assert!(registry
            .resolve_transition(TypeId::of::<Open>(), TypeId::of::<Lock>())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_state_rejected() {
        let decl = door_decl().state(StateDecl::<Door, Open>::normal(|_| Open));
        let err = Registry::build(decl).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateState { .. }));
    }

    #[test]
    fn test_empty_machine_name_rejected() {
        let decl = MachineDecl::<Door>::new("");
        let err = Registry::build(decl).unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyMachineName));
    }

    #[test]
    fn test_unknown_timeout_target_rejected() {
        struct Missing;
        let decl = MachineDecl::new("door").state(
            StateDecl::<Door, Closed>::start(|_| Closed)
                .timeout(Duration::from_secs(1), |_s: &mut Closed| Missing),
        );
        let err = Registry::build(decl).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownTimeoutTarget { .. }));
    }

    #[test]
    fn test_zero_period_timer_rejected() {
        let decl = door_decl().timer(crate::decl::TimerDecl::fixed_rate(
            Duration::ZERO,
            Duration::ZERO,
            || Push,
        ));
        let err = Registry::build(decl).unwrap_err();
        assert!(matches!(err, DefinitionError::ZeroTimerPeriod { .. }));
    }

    #[test]
    fn test_no_start_state() {
        let decl = MachineDecl::new("door").state(StateDecl::<Door, Open>::normal(|_| Open));
        let registry = Registry::build(decl).unwrap();
        let err = registry.start_state().unwrap_err();
        assert!(matches!(err, DefinitionError::NoStartState { .. }));
    }

    #[test]
    fn test_ambiguous_start_states() {
        let decl = MachineDecl::new("door")
            .state(StateDecl::<Door, Closed>::start(|_| Closed))
            .state(StateDecl::<Door, Open>::start(|_| Open));
        let registry = Registry::build(decl).unwrap();
        let err = registry.start_state().unwrap_err();
        assert!(matches!(err, DefinitionError::AmbiguousStartState { .. }));
    }

    #[test]
    fn test_start_state_scoping_tie_break() {
        // Two start states, but only one scoped to this machine.
        let decl = MachineDecl::new("door")
            .state(StateDecl::<Door, Closed>::start(|_| Closed).scoped("door"))
            .state(StateDecl::<Door, Open>::start(|_| Open).scoped("gate"));
        let registry = Registry::build(decl).unwrap();
        let start = registry.start_state().unwrap();
        assert_eq!(start.id(), StateId::of::<Closed>());
    }

    #[test]
    fn test_single_start_state_wins_regardless_of_scope() {
        let decl = MachineDecl::new("door")
            .state(StateDecl::<Door, Closed>::start(|_| Closed).scoped("gate"))
            .state(StateDecl::<Door, Open>::normal(|_| Open));
        let registry = Registry::build(decl).unwrap();
        assert_eq!(registry.start_state().unwrap().id(), StateId::of::<Closed>());
    }

    #[test]
    fn test_ambiguous_transition_resolution() {
        let decl = MachineDecl::new("door").state(
            StateDecl::<Door, Closed>::start(|_| Closed)
                .on_event(|_s: &mut Closed, _e: &Push| Some(Open))
                .on_event(|_s: &mut Closed, _e: &Push| Some(Locked)),
        );
        let registry = Registry::build(decl).unwrap();
        let err = registry
            .resolve_transition(TypeId::of::<Closed>(), TypeId::of::<Push>())
            .unwrap_err();
        assert!(matches!(err, DefinitionError::AmbiguousTransition { .. }));
    }

    #[test]
    fn test_actions_for_multiple_same_phase() {
        let decl = MachineDecl::new("door").state(
            StateDecl::<Door, Closed>::start(|_| Closed)
                .on_enter(|_s: &mut Closed| {})
                .on_enter_with(|_s: &mut Closed, _m: &mut Door| {}),
        );
        let registry = Registry::build(decl).unwrap();
        let actions = registry.actions_for(TypeId::of::<Closed>(), ActionPhase::OnEnter);
        assert_eq!(actions.len(), 2);
        assert!(registry
            .actions_for(TypeId::of::<Closed>(), ActionPhase::OnExit)
            .is_empty());
    }

    #[test]
    fn test_timer_scope_filtering() {
        struct Tick;
        let decl = door_decl()
            .timer(TimerDecl::fixed_rate(
                Duration::ZERO,
                Duration::from_millis(10),
                || Tick,
            ))
            .timer(
                TimerDecl::fixed_rate(Duration::ZERO, Duration::from_millis(10), || Tick)
                    .scoped("door"),
            )
            .timer(
                TimerDecl::fixed_rate(Duration::ZERO, Duration::from_millis(10), || Tick)
                    .scoped("gate"),
            );
        let registry = Registry::build(decl).unwrap();
        // Unscoped and matching-scope timers kept, foreign scope dropped.
        assert_eq!(registry.timer_events().len(), 2);
    }

    #[test]
    fn test_instantiate_uses_factory() {
        let registry = Registry::build(door_decl()).unwrap();
        let mut door = Door::default();
        let state = registry
            .instantiate(TypeId::of::<Closed>(), &mut door)
            .expect("factory registered");
        assert_eq!(state.as_ref().type_id(), TypeId::of::<Closed>());
        assert!(registry.instantiate(TypeId::of::<u8>(), &mut door).is_none());
    }

    mod start_resolution_properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Default)]
        struct Rig;
        #[derive(Default)]
        struct S0;
        #[derive(Default)]
        struct S1;
        #[derive(Default)]
        struct S2;
        #[derive(Default)]
        struct S3;

        #[derive(Debug, Clone, Copy)]
        struct Slot {
            declared: bool,
            start: bool,
            // 0 = unscoped, 1 = this machine, 2 = foreign machine
            scope: u8,
        }

        fn slot() -> impl Strategy<Value = Slot> {
            (any::<bool>(), any::<bool>(), 0u8..3).prop_map(|(declared, start, scope)| Slot {
                declared,
                start,
                scope,
            })
        }

        fn scope_str(slot: &Slot) -> Option<&'static str> {
            match slot.scope {
                1 => Some("rig"),
                2 => Some("other"),
                _ => None,
            }
        }

        macro_rules! add_slot {
            ($decl:expr, $slot:expr, $ty:ty) => {{
                let mut decl = $decl;
                if $slot.declared {
                    let mut state = if $slot.start {
                        StateDecl::<Rig, $ty>::start(|_| <$ty>::default())
                    } else {
                        StateDecl::<Rig, $ty>::normal(|_| <$ty>::default())
                    };
                    if let Some(scope) = scope_str(&$slot) {
                        state = state.scoped(scope);
                    }
                    decl = decl.state(state);
                }
                decl
            }};
        }

        proptest! {
            #[test]
            fn start_resolution_matches_policy(slots in [slot(), slot(), slot(), slot()]) {
                let mut decl = MachineDecl::new("rig");
                decl = add_slot!(decl, slots[0], S0);
                decl = add_slot!(decl, slots[1], S1);
                decl = add_slot!(decl, slots[2], S2);
                decl = add_slot!(decl, slots[3], S3);

                let registry = Registry::build(decl).unwrap();

                let starts: Vec<&Slot> =
                    slots.iter().filter(|s| s.declared && s.start).collect();
                let resolved = registry.start_state();

                match starts.len() {
                    0 => {
                        let ok = matches!(resolved, Err(DefinitionError::NoStartState { .. }));
                        prop_assert!(ok);
                    }
                    1 => prop_assert!(resolved.is_ok()),
                    _ => {
                        let scoped_here =
                            starts.iter().filter(|s| s.scope == 1).count();
                        match scoped_here {
                            0 => {
                                let ok = matches!(
                                    resolved,
                                    Err(DefinitionError::NoStartState { .. })
                                );
                                prop_assert!(ok);
                            }
                            1 => prop_assert!(resolved.is_ok()),
                            _ => {
                                let ok = matches!(
                                    resolved,
                                    Err(DefinitionError::AmbiguousStartState { .. })
                                );
                                prop_assert!(ok);
                            }
                        }
                    }
                }
            }
        }
    }
}
