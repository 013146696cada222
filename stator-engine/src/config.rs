//! Engine configuration.
//!
//! Configuration is resolved in the following order (later overrides
//! earlier):
//! 1. Default values
//! 2. YAML config file (if specified via `STATOR_CONFIG` or loaded
//!    explicitly with [`EngineConfig::from_file`])
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Settings consumed by the engine at construction. Immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the bounded event queue. Must be > 0.
    pub queue_capacity: usize,
    /// Budget for a single action invocation in milliseconds. Must be > 0.
    /// Carried on the configuration surface; the runtime does not enforce
    /// it as a deadline.
    pub action_timeout_ms: u64,
    /// Budget for a single transition invocation in milliseconds. Must
    /// be > 0. Same enforcement caveat as `action_timeout_ms`.
    pub transition_timeout_ms: u64,
    /// How long `start()` waits for the worker's readiness signal.
    pub start_timeout_ms: u64,
    /// How long `event()` waits for queue capacity before failing with
    /// backpressure.
    pub enqueue_timeout_ms: u64,
    /// Runtime that executes the worker loop. Defaults to the runtime
    /// `start()` is called on.
    #[serde(skip)]
    pub worker_handle: Option<tokio::runtime::Handle>,
    /// Runtime that executes timer callbacks. Defaults to the runtime
    /// `start()` is called on.
    #[serde(skip)]
    pub timer_handle: Option<tokio::runtime::Handle>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            action_timeout_ms: 1000,
            transition_timeout_ms: 1000,
            start_timeout_ms: 2000,
            enqueue_timeout_ms: 1000,
            worker_handle: None,
            timer_handle: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from file if `STATOR_CONFIG` is set, then
    /// applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(path) = std::env::var("STATOR_CONFIG") {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(capacity) = std::env::var("STATOR_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.queue_capacity = n;
            }
        }
        if let Ok(ms) = std::env::var("STATOR_ACTION_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.action_timeout_ms = n;
            }
        }
        if let Ok(ms) = std::env::var("STATOR_TRANSITION_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.transition_timeout_ms = n;
            }
        }
        if let Ok(ms) = std::env::var("STATOR_START_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.start_timeout_ms = n;
            }
        }
        if let Ok(ms) = std::env::var("STATOR_ENQUEUE_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.enqueue_timeout_ms = n;
            }
        }
    }

    /// Overrides the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Overrides the action timeout.
    pub fn with_action_timeout_ms(mut self, ms: u64) -> Self {
        self.action_timeout_ms = ms;
        self
    }

    /// Overrides the transition timeout.
    pub fn with_transition_timeout_ms(mut self, ms: u64) -> Self {
        self.transition_timeout_ms = ms;
        self
    }

    /// Overrides the readiness wait bound for `start()`.
    pub fn with_start_timeout_ms(mut self, ms: u64) -> Self {
        self.start_timeout_ms = ms;
        self
    }

    /// Overrides the backpressure wait bound for `event()`.
    pub fn with_enqueue_timeout_ms(mut self, ms: u64) -> Self {
        self.enqueue_timeout_ms = ms;
        self
    }

    /// Pins the worker loop to a specific runtime.
    pub fn with_worker_handle(mut self, handle: tokio::runtime::Handle) -> Self {
        self.worker_handle = Some(handle);
        self
    }

    /// Pins timer callbacks to a specific runtime.
    pub fn with_timer_handle(mut self, handle: tokio::runtime::Handle) -> Self {
        self.timer_handle = Some(handle);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue_capacity must be > 0".to_string(),
            ));
        }
        if self.action_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "action_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.transition_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "transition_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.start_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "start_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.enqueue_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "enqueue_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

/// Configuration error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(PathBuf, String),

    #[error("failed to parse config file '{0}': {1}")]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
