//! Timer scheduling on top of tokio tasks.
//!
//! The scheduler runs callbacks on its own runtime handle, independent of
//! the worker. Callbacks never touch engine state directly; the engine
//! wires them to post synthetic events into its queue.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Handle to one scheduled callback, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(Uuid);

/// Schedules one-shot and fixed-rate callbacks.
pub(crate) struct TimerScheduler {
    handle: tokio::runtime::Handle,
    tasks: Arc<DashMap<Uuid, tokio::task::JoinHandle<()>>>,
}

impl TimerScheduler {
    pub(crate) fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Runs `fire` once after `delay`.
    pub(crate) fn schedule_once<F>(&self, delay: Duration, fire: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = Uuid::new_v4();
        let tasks = Arc::clone(&self.tasks);
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
            tasks.remove(&id);
        });
        self.tasks.insert(id, task);
        TimerHandle(id)
    }

    /// Runs `fire` every `period`, first firing `delay` from now.
    pub(crate) fn schedule_fixed_rate<F>(&self, delay: Duration, period: Duration, fire: F) -> TimerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let task = self.handle.spawn(async move {
            let mut ticks = interval_at(Instant::now() + delay, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                fire();
            }
        });
        self.tasks.insert(id, task);
        TimerHandle(id)
    }

    /// Best-effort cancellation. A callback that already fired may have
    /// posted its event before the cancel lands; that event is still
    /// delivered.
    pub(crate) fn cancel(&self, handle: TimerHandle) {
        if let Some((_, task)) = self.tasks.remove(&handle.0) {
            task.abort();
        }
    }

    /// Aborts every outstanding callback.
    pub(crate) fn shutdown(&self) {
        self.tasks.retain(|_, task| {
            task.abort();
            false
        });
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter_fire(counter: &Arc<AtomicU32>) -> impl Fn() + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_fires() {
        let scheduler = TimerScheduler::new(tokio::runtime::Handle::current());
        let fired = Arc::new(AtomicU32::new(0));

        scheduler.schedule_once(Duration::from_millis(50), counter_fire(&fired));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Completed one-shots unregister themselves.
        tokio::task::yield_now().await;
        assert_eq!(scheduler.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let scheduler = TimerScheduler::new(tokio::runtime::Handle::current());
        let fired = Arc::new(AtomicU32::new(0));

        let handle = scheduler.schedule_once(Duration::from_millis(50), counter_fire(&fired));
        scheduler.cancel(handle);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_fires_repeatedly() {
        let scheduler = TimerScheduler::new(tokio::runtime::Handle::current());
        let fired = Arc::new(AtomicU32::new(0));

        let handle = scheduler.schedule_fixed_rate(
            Duration::from_millis(10),
            Duration::from_millis(20),
            counter_fire(&fired),
        );
        tokio::time::sleep(Duration::from_millis(75)).await;

        // Fires at 10, 30, 50, 70 ms.
        assert_eq!(fired.load(Ordering::SeqCst), 4);

        scheduler.cancel(handle);
        let before = fired.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_all() {
        let scheduler = TimerScheduler::new(tokio::runtime::Handle::current());
        let fired = Arc::new(AtomicU32::new(0));

        scheduler.schedule_once(Duration::from_millis(50), counter_fire(&fired));
        scheduler.schedule_fixed_rate(
            Duration::from_millis(10),
            Duration::from_millis(10),
            counter_fire(&fired),
        );

        scheduler.shutdown();
        assert_eq!(scheduler.outstanding(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
