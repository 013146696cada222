//! Shared helpers for integration tests.
#![allow(dead_code)]

use stator::{Engine, Lifecycle, StateId};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Polls until the engine's current state equals `expected`, or `budget`
/// elapses. Returns whether the state was reached.
pub async fn await_state<M: Send + 'static>(
    engine: &Engine<M>,
    expected: StateId,
    budget: Duration,
) -> bool {
    tokio::time::timeout(budget, async {
        while engine.snapshot().current_state != Some(expected) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Polls until the engine reaches the given lifecycle state.
pub async fn await_lifecycle<M: Send + 'static>(
    engine: &Engine<M>,
    expected: Lifecycle,
    budget: Duration,
) -> bool {
    tokio::time::timeout(budget, async {
        while engine.lifecycle() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
