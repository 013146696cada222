//! # stator
//!
//! A declarative finite-state-machine execution runtime.
//!
//! A machine is declared as a set of state types with transition, action
//! and timeout bindings, plus machine-wide timer events. One [`Engine`]
//! executes one machine instance to completion, processing one event at a
//! time on a dedicated worker: all action and transition code is
//! single-threaded from the machine author's point of view, while the
//! surrounding system submits events concurrently through a bounded queue.
//!
//! ```no_run
//! use stator::{Engine, MachineDecl, StateDecl};
//!
//! struct Phone;
//! struct OnHook;
//! struct OffHook;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), stator::EngineError> {
//! let decl = MachineDecl::new("phone")
//!     .state(
//!         StateDecl::<Phone, OnHook>::start(|_| OnHook).on_event(
//!             |_state: &mut OnHook, event: &String| {
//!                 (event == "someone picks up the handset").then_some(OffHook)
//!             },
//!         ),
//!     )
//!     .state(StateDecl::<Phone, OffHook>::normal(|_| OffHook));
//!
//! let engine = Engine::new(Phone, decl)?;
//! engine.start().await?;
//! engine.event("someone picks up the handset".to_string()).await?;
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

pub use stator_core::{
    ActionArity, ActionBinding, ActionPhase, BoxedEvent, BoxedState, DefinitionError, MachineDecl,
    Registry, StateDecl, StateDescriptor, StateId, StateKind, TimeoutBinding, TimerDecl,
    TimerSchedule, TransitionBinding,
};
pub use stator_engine::{
    ConfigError, Engine, EngineConfig, EngineError, Lifecycle, Snapshot, TimerHandle,
};
