//! Cancellable fixed-interval background tasks.
//!
//! [`PeriodicTask`] is the single scheduling primitive used by the health
//! checker and leak detector. Each task owns a tokio task driven by
//! [`tokio::time::interval`] and a `watch` channel for cooperative shutdown:
//! `stop()` signals the channel and awaits the task, so a callback in
//! progress runs to completion rather than being aborted mid-tick.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a running periodic task.
///
/// Dropping the handle closes the shutdown channel, which also stops the
/// task, but without waiting for an in-progress tick; call
/// [`stop`](Self::stop) for a clean, awaited teardown.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` on a fixed interval until stopped.
    ///
    /// The first tick fires after one full `interval`, not immediately;
    /// missed ticks are skipped rather than bursted.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval's first tick resolves immediately; consume it.
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => tick().await,
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "Periodic task stopped");
        });
        debug!(task = name, interval_ms = interval.as_millis() as u64, "Periodic task started");
        Self {
            name,
            shutdown,
            task,
        }
    }

    /// Task name, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop and wait for the current tick to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(100), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        task.stop().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_before_first_interval() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(100), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.stop().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_ticking() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(100), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        task.stop().await;
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
