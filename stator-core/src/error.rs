//! Declaration and resolution error types.

use thiserror::Error;

/// Errors from building a registry or resolving against it.
///
/// All of these indicate a static authoring defect in the machine
/// declaration, not a transient condition; the engine treats them as
/// unrecoverable for the affected machine instance.
#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    #[error("machine name must not be empty")]
    EmptyMachineName,

    #[error("duplicate state declaration: {state}")]
    DuplicateState { state: &'static str },

    #[error("timeout transition on '{state}' targets undeclared state '{target}'")]
    UnknownTimeoutTarget {
        state: &'static str,
        target: &'static str,
    },

    #[error("timer event '{event}' declares a zero period")]
    ZeroTimerPeriod { event: &'static str },

    #[error("no start state declared for machine '{machine}'")]
    NoStartState { machine: String },

    #[error("ambiguous start states for machine '{machine}': {candidates:?}")]
    AmbiguousStartState {
        machine: String,
        candidates: Vec<String>,
    },

    #[error("ambiguous transitions from '{state}' on event '{event}'")]
    AmbiguousTransition { state: String, event: String },

    #[error("transition from '{state}' on '{event}' returned an undeclared state")]
    UnknownTransitionTarget { state: String, event: String },
}

impl DefinitionError {
    /// Returns an error code suitable for structured reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            DefinitionError::EmptyMachineName => "BAD_DECLARATION",
            DefinitionError::DuplicateState { .. } => "BAD_DECLARATION",
            DefinitionError::UnknownTimeoutTarget { .. } => "BAD_DECLARATION",
            DefinitionError::ZeroTimerPeriod { .. } => "BAD_DECLARATION",
            DefinitionError::NoStartState { .. } => "NO_START_STATE",
            DefinitionError::AmbiguousStartState { .. } => "AMBIGUOUS_START_STATE",
            DefinitionError::AmbiguousTransition { .. } => "AMBIGUOUS_TRANSITION",
            DefinitionError::UnknownTransitionTarget { .. } => "UNKNOWN_TARGET",
        }
    }
}
