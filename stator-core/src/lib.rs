//! # stator-core
//!
//! Declaration and resolution layer for the stator state machine runtime.
//!
//! This crate provides:
//! - Machine declarations: states, transitions, actions, timeout
//!   transitions and machine-wide timer events
//! - The immutable [`Registry`] that indexes one declaration and answers
//!   structural queries
//! - The declaration/resolution error taxonomy
//!
//! It contains no concurrency; the execution runtime lives in
//! `stator-engine`.

pub mod decl;
pub mod error;
pub mod registry;
pub mod state;

pub use decl::{
    ActionArity, ActionBinding, ActionPhase, BoxedEvent, BoxedState, MachineDecl, StateDecl,
    TimeoutBinding, TimerDecl, TimerSchedule, TransitionBinding,
};
pub use error::DefinitionError;
pub use registry::Registry;
pub use state::{StateDescriptor, StateId, StateKind};
