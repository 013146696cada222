//! Engine error types.

use stator_core::DefinitionError;
use thiserror::Error;

/// Errors from the engine runtime.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A declaration or resolution defect. Unrecoverable for this machine
    /// instance: the engine shuts down rather than retrying.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("invalid engine configuration: {reason}")]
    Config { reason: String },

    #[error("engine is not running")]
    NotRunning,

    #[error("engine already started")]
    AlreadyStarted,

    #[error("engine did not become ready within {timeout_ms} ms")]
    StartTimeout { timeout_ms: u64 },

    #[error("event queue full: no capacity freed within {timeout_ms} ms")]
    BackpressureTimeout { timeout_ms: u64 },

    #[error("engine terminated")]
    Terminated,
}

impl EngineError {
    /// Returns an error code suitable for structured reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Definition(e) => e.error_code(),
            EngineError::Config { .. } => "BAD_CONFIG",
            EngineError::NotRunning => "NOT_RUNNING",
            EngineError::AlreadyStarted => "ALREADY_STARTED",
            EngineError::StartTimeout { .. } => "START_TIMEOUT",
            EngineError::BackpressureTimeout { .. } => "BACKPRESSURE_TIMEOUT",
            EngineError::Terminated => "TERMINATED",
        }
    }

    /// Whether this error indicates a static authoring defect rather than
    /// a transient condition.
    pub fn is_definition_defect(&self) -> bool {
        matches!(self, EngineError::Definition(_))
    }
}
