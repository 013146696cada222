//! Shared engine context: the current/previous state pair.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use stator_core::StateId;

/// Point-in-time view of the engine context. The pair is read atomically:
/// a snapshot never shows a half-applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Current state, absent before the machine has started.
    pub current_state: Option<StateId>,
    /// State the machine was in before the last transition.
    pub previous_state: Option<StateId>,
    /// When the current state was entered.
    pub entered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ContextInner {
    current: Option<StateId>,
    previous: Option<StateId>,
    entered_at: Option<DateTime<Utc>>,
}

/// The mutable state pair, written only by the worker and read by
/// snapshot observers through the same lock.
#[derive(Debug, Default)]
pub(crate) struct EngineContext {
    inner: RwLock<ContextInner>,
}

impl EngineContext {
    pub(crate) fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        Snapshot {
            current_state: inner.current,
            previous_state: inner.previous,
            entered_at: inner.entered_at,
        }
    }

    pub(crate) fn current(&self) -> Option<StateId> {
        self.inner.read().current
    }

    pub(crate) fn has_current(&self) -> bool {
        self.inner.read().current.is_some()
    }

    /// Records entry into the start state.
    pub(crate) fn enter_initial(&self, state: StateId) {
        let mut inner = self.inner.write();
        inner.current = Some(state);
        inner.entered_at = Some(Utc::now());
    }

    /// Swaps the pair for a completed transition.
    pub(crate) fn transition_to(&self, state: StateId) {
        let mut inner = self.inner.write();
        inner.previous = inner.current;
        inner.current = Some(state);
        inner.entered_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OnHook;
    struct OffHook;

    #[test]
    fn test_empty_before_start() {
        let context = EngineContext::default();
        let snapshot = context.snapshot();
        assert!(snapshot.current_state.is_none());
        assert!(snapshot.previous_state.is_none());
        assert!(snapshot.entered_at.is_none());
        assert!(!context.has_current());
    }

    #[test]
    fn test_initial_entry() {
        let context = EngineContext::default();
        context.enter_initial(StateId::of::<OnHook>());

        let snapshot = context.snapshot();
        assert_eq!(snapshot.current_state, Some(StateId::of::<OnHook>()));
        assert!(snapshot.previous_state.is_none());
        assert!(snapshot.entered_at.is_some());
    }

    #[test]
    fn test_transition_swaps_pair() {
        let context = EngineContext::default();
        context.enter_initial(StateId::of::<OnHook>());
        context.transition_to(StateId::of::<OffHook>());

        let snapshot = context.snapshot();
        assert_eq!(snapshot.current_state, Some(StateId::of::<OffHook>()));
        assert_eq!(snapshot.previous_state, Some(StateId::of::<OnHook>()));
    }
}
