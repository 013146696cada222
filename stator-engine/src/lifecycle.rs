//! Engine lifecycle: a small state machine of its own.

use tokio::sync::watch;

/// Lifecycle states of an engine instance.
///
/// `Failed` is reachable from any non-terminal state and is sticky: once
/// failed, the engine never reports `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl Lifecycle {
    /// Whether the engine accepts external events in this state.
    pub fn is_running(&self) -> bool {
        *self == Lifecycle::Running
    }

    /// Whether this is an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Lifecycle::Terminated | Lifecycle::Failed)
    }
}

/// Shared lifecycle cell. Transitions are serialized through the watch
/// channel, which doubles as the observation surface.
#[derive(Clone)]
pub(crate) struct LifecycleCell {
    tx: watch::Sender<Lifecycle>,
}

impl LifecycleCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Lifecycle::New);
        Self { tx }
    }

    pub(crate) fn get(&self) -> Lifecycle {
        *self.tx.borrow()
    }

    /// Atomically moves `from -> to`; returns false if the current state
    /// was not `from`.
    pub(crate) fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    /// Marks the engine failed, unless it already reached an end state.
    pub(crate) fn fail(&self) {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = Lifecycle::Failed;
                true
            }
        });
    }

    /// Marks the worker's exit: `Terminated`, unless the engine failed.
    pub(crate) fn finish(&self) {
        self.tx.send_if_modified(|current| {
            if *current == Lifecycle::Failed {
                false
            } else {
                *current = Lifecycle::Terminated;
                true
            }
        });
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Lifecycle> {
        self.tx.subscribe()
    }
}
