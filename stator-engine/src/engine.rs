//! The engine: a single-worker actor loop over a bounded event queue.
//!
//! One engine instance executes one machine. All state mutation, action
//! invocation and transition resolution happen on the worker, serialized,
//! so machine code is single-threaded from the author's point of view.
//! Producers (external callers, the timer scheduler, the engine's own
//! START/STOP sentinels) only enqueue.

use crate::config::EngineConfig;
use crate::context::{EngineContext, Snapshot};
use crate::error::EngineError;
use crate::lifecycle::{Lifecycle, LifecycleCell};
use crate::timer::{TimerHandle, TimerScheduler};
use parking_lot::Mutex;
use stator_core::{
    ActionPhase, BoxedEvent, BoxedState, DefinitionError, MachineDecl, Registry, StateId,
    TimerSchedule,
};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Messages on the engine's queue. START and STOP are internal sentinels;
/// STOP is never passed to transition resolution.
enum Envelope {
    Start,
    Stop,
    Event(BoxedEvent),
    Timeout {
        state: TypeId,
        generation: u64,
        index: usize,
    },
}

/// Executes one machine to completion, one event at a time.
pub struct Engine<M: Send + 'static> {
    registry: Arc<Registry<M>>,
    machine: Arc<Mutex<M>>,
    config: EngineConfig,
    lifecycle: LifecycleCell,
    context: Arc<EngineContext>,
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    scheduler: Mutex<Option<Arc<TimerScheduler>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    fault: Arc<Mutex<Option<EngineError>>>,
}

impl<M: Send + 'static> Engine<M> {
    /// Builds an engine for `machine` with default configuration. The
    /// registry is built eagerly; a malformed declaration fails here.
    pub fn new(machine: M, decl: MachineDecl<M>) -> Result<Self, EngineError> {
        Self::with_config(machine, decl, EngineConfig::default())
    }

    /// Builds an engine with explicit configuration.
    pub fn with_config(
        machine: M,
        decl: MachineDecl<M>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(|e| EngineError::Config {
            reason: e.to_string(),
        })?;
        let registry = Registry::build(decl)?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        Ok(Self {
            registry: Arc::new(registry),
            machine: Arc::new(Mutex::new(machine)),
            config,
            lifecycle: LifecycleCell::new(),
            context: Arc::new(EngineContext::default()),
            tx,
            rx: Mutex::new(Some(rx)),
            scheduler: Mutex::new(None),
            worker: Mutex::new(None),
            fault: Arc::new(Mutex::new(None)),
        })
    }

    /// Starts the engine: spawns the worker, arms machine-wide timers,
    /// enqueues the internal START event and waits for the worker to enter
    /// the start state.
    ///
    /// Fails with `StartTimeout` if readiness is not signalled within the
    /// configured bound (the engine is left in whatever state the worker
    /// reached), or with the start-state resolution error if the
    /// declaration has zero or several eligible start states.
    pub async fn start(&self) -> Result<(), EngineError> {
        if !self.lifecycle.transition(Lifecycle::New, Lifecycle::Starting) {
            return Err(EngineError::AlreadyStarted);
        }
        tracing::info!(machine = self.registry.machine_name(), "starting engine");

        let worker_handle = self
            .config
            .worker_handle
            .clone()
            .unwrap_or_else(tokio::runtime::Handle::current);
        let timer_handle = self
            .config
            .timer_handle
            .clone()
            .unwrap_or_else(tokio::runtime::Handle::current);

        let scheduler = Arc::new(TimerScheduler::new(timer_handle));
        *self.scheduler.lock() = Some(Arc::clone(&scheduler));

        let rx = self
            .rx
            .lock()
            .take()
            .expect("engine receiver consumed exactly once");
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker = Worker {
            registry: Arc::clone(&self.registry),
            machine: Arc::clone(&self.machine),
            context: Arc::clone(&self.context),
            scheduler: Arc::clone(&scheduler),
            lifecycle: self.lifecycle.clone(),
            tx: self.tx.clone(),
            rx,
            instances: HashMap::new(),
            armed: Vec::new(),
            generation: 0,
            fault: Arc::clone(&self.fault),
            draining: false,
            stop_requested: false,
        };
        *self.worker.lock() = Some(worker_handle.spawn(worker.run(ready_tx)));

        self.arm_machine_timers(&scheduler);

        if self.tx.send(Envelope::Start).await.is_err() {
            return Err(EngineError::Terminated);
        }

        match tokio::time::timeout(self.config.start_timeout(), ready_rx).await {
            Err(_) => Err(EngineError::StartTimeout {
                timeout_ms: self.config.start_timeout_ms,
            }),
            Ok(Err(_)) => Err(self.fault().unwrap_or(EngineError::Terminated)),
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e),
        }
    }

    /// Submits an event. Never blocks on processing; blocks only if the
    /// bounded queue is full, up to the configured wait.
    pub async fn event<E: Any + Send>(&self, event: E) -> Result<(), EngineError> {
        self.event_boxed(Box::new(event)).await
    }

    /// Submits an already-boxed event.
    pub async fn event_boxed(&self, event: BoxedEvent) -> Result<(), EngineError> {
        if !self.lifecycle.get().is_running() {
            return Err(EngineError::NotRunning);
        }
        match self
            .tx
            .send_timeout(Envelope::Event(event), self.config.enqueue_timeout())
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                Err(EngineError::BackpressureTimeout {
                    timeout_ms: self.config.enqueue_timeout_ms,
                })
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(EngineError::NotRunning),
        }
    }

    /// Stops the engine: enqueues the STOP sentinel, waits for the worker
    /// to drain and exit, then shuts down the timer scheduler. Events
    /// enqueued before STOP are still processed in FIFO order.
    ///
    /// Returns the recorded fault if the worker shut down on an
    /// unrecoverable error.
    pub async fn stop(&self) -> Result<(), EngineError> {
        match self.lifecycle.get() {
            Lifecycle::New => return Err(EngineError::NotRunning),
            state if state.is_terminal() && self.worker.lock().is_none() => {
                return match self.fault() {
                    Some(fault) => Err(fault),
                    None => Ok(()),
                };
            }
            _ => {}
        }
        tracing::info!(machine = self.registry.machine_name(), "stopping engine");
        self.lifecycle.transition(Lifecycle::Running, Lifecycle::Stopping);

        // The worker may already be gone; a failed send is fine.
        let _ = self.tx.send(Envelope::Stop).await;

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.await.is_err() {
                tracing::error!(
                    machine = self.registry.machine_name(),
                    "engine worker panicked"
                );
            }
        }
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }

        match self.fault() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Atomic view of the current/previous state pair.
    pub fn snapshot(&self) -> Snapshot {
        self.context.snapshot()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// Observes lifecycle transitions as they happen.
    pub fn lifecycle_watch(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.watch()
    }

    /// The machine under execution. The worker locks it while running
    /// actions; observers should hold the lock briefly.
    pub fn machine(&self) -> Arc<Mutex<M>> {
        Arc::clone(&self.machine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry<M> {
        &self.registry
    }

    pub fn machine_name(&self) -> &str {
        self.registry.machine_name()
    }

    /// The unrecoverable fault that shut the worker down, if any.
    pub fn fault(&self) -> Option<EngineError> {
        self.fault.lock().clone()
    }

    /// Arms all machine-wide timer events, once, for the whole lifetime.
    /// Each firing posts its synthetic event only while the engine is
    /// running with a current state set; otherwise it is dropped.
    fn arm_machine_timers(&self, scheduler: &TimerScheduler) {
        for timer in self.registry.timer_events() {
            let schedule = timer.schedule();
            let timer = timer.clone();
            let tx = self.tx.clone();
            let context = Arc::clone(&self.context);
            let lifecycle = self.lifecycle.clone();
            let event_name = timer.event_name();
            let post = move || {
                if !lifecycle.get().is_running() || !context.has_current() {
                    tracing::debug!(event = event_name, "dropping timer firing: engine not ready");
                    return;
                }
                if tx.try_send(Envelope::Event(timer.make_event())).is_err() {
                    tracing::warn!(
                        event = event_name,
                        "dropping timer firing: queue full or closed"
                    );
                }
            };
            match schedule {
                TimerSchedule::FixedRate { delay, period } => {
                    scheduler.schedule_fixed_rate(delay, period, post);
                }
                TimerSchedule::OneShot { delay } => {
                    scheduler.schedule_once(delay, post);
                }
            }
        }
    }
}

impl<M: Send + 'static> fmt::Debug for Engine<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("machine", &self.registry.machine_name())
            .field("lifecycle", &self.lifecycle.get())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl<M: Send + 'static> Drop for Engine<M> {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

/// The actor loop. Owns the queue receiver, the state instance cache and
/// the armed timeout handles; nothing else touches them.
struct Worker<M: Send + 'static> {
    registry: Arc<Registry<M>>,
    machine: Arc<Mutex<M>>,
    context: Arc<EngineContext>,
    scheduler: Arc<TimerScheduler>,
    lifecycle: LifecycleCell,
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
    /// Singleton state instances, constructed lazily on first entry.
    instances: HashMap<TypeId, BoxedState>,
    /// Timeout handles armed for the current state.
    armed: Vec<TimerHandle>,
    /// Bumped on every re-arm cycle; stale firings are ignored.
    generation: u64,
    fault: Arc<Mutex<Option<EngineError>>>,
    draining: bool,
    stop_requested: bool,
}

impl<M: Send + 'static> Worker<M> {
    async fn run(mut self, ready: oneshot::Sender<Result<(), EngineError>>) {
        tracing::debug!(machine = self.registry.machine_name(), "worker started");
        let mut ready = Some(ready);

        while let Some(envelope) = self.rx.recv().await {
            match envelope {
                Envelope::Stop => {
                    tracing::debug!("leaving main loop");
                    break;
                }
                _ if self.draining => {
                    if !self.stop_requested {
                        self.stop_requested = self.tx.try_send(Envelope::Stop).is_ok();
                    }
                }
                Envelope::Start => match self.handle_start() {
                    Ok(()) => {
                        self.lifecycle.transition(Lifecycle::Starting, Lifecycle::Running);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    Err(error) => {
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(error.clone()));
                        }
                        self.fail(error);
                    }
                },
                Envelope::Event(event) => {
                    if let Err(error) = self.handle_event(event) {
                        self.fail(error);
                    }
                }
                Envelope::Timeout {
                    state,
                    generation,
                    index,
                } => self.handle_timeout(state, generation, index),
            }
        }

        self.cancel_armed();
        self.lifecycle.finish();
        tracing::debug!(machine = self.registry.machine_name(), "worker exited");
    }

    /// Records the fault and drains the queue to a self-enqueued STOP.
    fn fail(&mut self, error: EngineError) {
        tracing::error!(
            machine = self.registry.machine_name(),
            error = %error,
            "unrecoverable engine fault; shutting down"
        );
        self.fault.lock().get_or_insert(error);
        self.lifecycle.fail();
        self.draining = true;
        self.stop_requested = self.tx.try_send(Envelope::Stop).is_ok();
    }

    fn handle_start(&mut self) -> Result<(), EngineError> {
        let id = self.registry.start_state()?.id();
        tracing::info!(
            machine = self.registry.machine_name(),
            state = %id,
            "entering start state"
        );
        let ty = id.type_id();
        self.run_actions(ty, ActionPhase::Implied);
        self.run_actions(ty, ActionPhase::OnEnter);
        self.context.enter_initial(id);
        self.arm_timeouts(ty);
        Ok(())
    }

    fn handle_event(&mut self, event: BoxedEvent) -> Result<(), EngineError> {
        let Some(current) = self.context.current() else {
            tracing::debug!("dropping event delivered before start state entry");
            return Ok(());
        };
        let ty = current.type_id();

        // Implied actions run for every delivered event, transition or not.
        self.run_actions(ty, ActionPhase::Implied);

        let registry = Arc::clone(&self.registry);
        let binding = match registry.resolve_transition(ty, event.as_ref().type_id()) {
            Ok(None) => {
                tracing::trace!(state = %current, "no transition matches event");
                return Ok(());
            }
            Ok(Some(binding)) => binding.clone(),
            Err(error) => return Err(error.into()),
        };

        let next = {
            self.ensure_instance(ty);
            let instance = self.instances.get_mut(&ty).expect("instance cached");
            binding.invoke(instance.as_mut(), event.as_ref())
        };
        let Some(next) = next else {
            tracing::trace!(
                state = %current,
                event = binding.event_name(),
                "guard rejected event"
            );
            return Ok(());
        };

        let target_ty = next.as_ref().type_id();
        let target = registry
            .descriptor(target_ty)
            .ok_or_else(|| DefinitionError::UnknownTransitionTarget {
                state: current.short_name().to_string(),
                event: binding.event_name().to_string(),
            })?
            .id();

        self.apply_transition(current, target, Some(binding.event_name()));
        Ok(())
    }

    /// A timeout firing is itself the resolved transition; it bypasses the
    /// by-event-type search. Firings from a previous arming cycle, or for
    /// a state that is no longer current, are ignored.
    fn handle_timeout(&mut self, state: TypeId, generation: u64, index: usize) {
        let Some(current) = self.context.current() else {
            return;
        };

        self.run_actions(current.type_id(), ActionPhase::Implied);

        if current.type_id() != state || generation != self.generation {
            tracing::trace!(state = %current, "ignoring stale timeout firing");
            return;
        }

        let registry = Arc::clone(&self.registry);
        let Some(binding) = registry.timeouts_for(state).get(index).cloned() else {
            return;
        };

        let next = {
            self.ensure_instance(state);
            let instance = self.instances.get_mut(&state).expect("instance cached");
            binding.invoke(instance.as_mut())
        };
        debug_assert_eq!(next.as_ref().type_id(), binding.target().type_id());

        self.apply_transition(current, binding.target(), None);
    }

    /// Completes a transition as one unit: exit actions, timeout
    /// cancellation, state swap, entry actions, re-arm.
    fn apply_transition(&mut self, from: StateId, to: StateId, event: Option<&str>) {
        self.run_actions(from.type_id(), ActionPhase::OnExit);
        self.cancel_armed();
        self.context.transition_to(to);
        tracing::debug!(
            machine = self.registry.machine_name(),
            from = %from,
            to = %to,
            event = event.unwrap_or("timeout"),
            "transition"
        );
        self.run_actions(to.type_id(), ActionPhase::Implied);
        self.run_actions(to.type_id(), ActionPhase::OnEnter);
        self.arm_timeouts(to.type_id());
    }

    fn run_actions(&mut self, state: TypeId, phase: ActionPhase) {
        let registry = Arc::clone(&self.registry);
        let actions = registry.actions_for(state, phase);
        if actions.is_empty() {
            return;
        }
        self.ensure_instance(state);
        let instance = self.instances.get_mut(&state).expect("instance cached");
        let mut machine = self.machine.lock();
        for action in actions {
            action.invoke(instance.as_mut(), &mut machine);
        }
    }

    fn ensure_instance(&mut self, state: TypeId) {
        if self.instances.contains_key(&state) {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let instance = {
            let mut machine = self.machine.lock();
            registry
                .instantiate(state, &mut machine)
                .expect("factory registered for every declared state")
        };
        self.instances.insert(state, instance);
    }

    fn arm_timeouts(&mut self, state: TypeId) {
        let registry = Arc::clone(&self.registry);
        for (index, binding) in registry.timeouts_for(state).iter().enumerate() {
            let tx = self.tx.clone();
            let context = Arc::clone(&self.context);
            let generation = self.generation;
            let timeout_target = binding.target();
            let handle = self.scheduler.schedule_once(binding.period(), move || {
                if !context.has_current() {
                    return;
                }
                if tx
                    .try_send(Envelope::Timeout {
                        state,
                        generation,
                        index,
                    })
                    .is_err()
                {
                    tracing::warn!(
                        timeout_target = %timeout_target,
                        "dropping timeout firing: queue full or closed"
                    );
                }
            });
            self.armed.push(handle);
        }
    }

    fn cancel_armed(&mut self) {
        for handle in self.armed.drain(..) {
            self.scheduler.cancel(handle);
        }
        self.generation = self.generation.wrapping_add(1);
    }
}
