//! The explicitly-owned service object tying the subsystem together.
//!
//! [`PoolGuard`] owns the shared pool slot, the monitor, the health checker,
//! the leak detector, the classifier, and the timeout guard. Nothing here is
//! global: construct as many isolated instances as needed (tests rely on
//! this), call [`initialize`](PoolGuard::initialize) once the pool exists,
//! and [`shutdown`](PoolGuard::shutdown) on termination.
//!
//! Shutdown walks `Running → Draining → Stopped`: timers stop, a forced
//! leak-fix pass releases anything leaked, new work is refused, in-flight
//! work gets a bounded grace period, and only then does the pool close.
//! Every failure along the way is logged and skipped; eventual termination
//! beats perfect cleanup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::classify::{ErrorClassifier, ErrorStatsReport};
use crate::config::Config;
use crate::error::{DbError, Result};
use crate::health::{HealthChecker, HealthState};
use crate::leak::{LeakDetector, PotentialLeakRecord};
use crate::monitor::{MetricsReport, PoolMonitor};
use crate::pool::{DatabasePool, EventSubscription, PoolSnapshot, SharedPool};
use crate::task::PeriodicTask;
use crate::timeout::TimeoutGuard;

/// Service lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, pool not yet attached.
    New,
    /// Pool attached, timers running, work accepted.
    Running,
    /// Shutting down: no new work, waiting for in-flight to settle.
    Draining,
    /// Pool closed; terminal.
    Stopped,
}

/// Background tasks and subscriptions owned while running.
#[derive(Default)]
struct RunningTasks {
    health: Option<PeriodicTask>,
    leak_check: Option<PeriodicTask>,
    leak_fix: Option<PeriodicTask>,
    events: Option<EventSubscription>,
}

/// Read-only status document for dashboards and tooling.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: LifecycleState,
    pub pool: Option<PoolSnapshot>,
    pub metrics: MetricsReport,
    pub health: HealthState,
    pub errors: ErrorStatsReport,
    pub leaks: PotentialLeakRecord,
    pub in_flight: u64,
}

/// Owns and coordinates the pool health/resilience components.
pub struct PoolGuard {
    config: Config,
    shared: SharedPool,
    monitor: Arc<PoolMonitor>,
    health: Arc<HealthChecker>,
    leaks: Arc<LeakDetector>,
    classifier: Arc<ErrorClassifier>,
    timeouts: TimeoutGuard,
    state: Mutex<LifecycleState>,
    tasks: Mutex<RunningTasks>,
    in_flight: Arc<AtomicU64>,
    settled: Arc<Notify>,
}

impl PoolGuard {
    pub fn new(config: Config) -> Self {
        let shared: SharedPool = Arc::new(RwLock::new(None));
        let monitor = Arc::new(PoolMonitor::new(
            Arc::clone(&shared),
            config.leak.high_utilization,
        ));
        let health = Arc::new(HealthChecker::new(Arc::clone(&shared)));
        let leaks = Arc::new(LeakDetector::new(
            Arc::clone(&shared),
            Arc::clone(&monitor),
            config.leak.clone(),
        ));
        let classifier = Arc::new(ErrorClassifier::new(
            Arc::clone(&monitor),
            Arc::clone(&health),
            config.health.connection_error_trigger,
        ));
        let timeouts = TimeoutGuard::new(
            Arc::clone(&monitor),
            Arc::clone(&health),
            config.timeouts.clone(),
        );

        Self {
            config,
            shared,
            monitor,
            health,
            leaks,
            classifier,
            timeouts,
            state: Mutex::new(LifecycleState::New),
            tasks: Mutex::new(RunningTasks::default()),
            in_flight: Arc::new(AtomicU64::new(0)),
            settled: Arc::new(Notify::new()),
        }
    }

    /// Attach the pool, subscribe to its events, and start the periodic
    /// health and leak tasks.
    pub fn initialize(&self, pool: Arc<dyn DatabasePool>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::New {
                return Err(DbError::Other(format!(
                    "initialize called in state {state:?}"
                ))
                .into());
            }
            *self.shared.write() = Some(pool);
            *state = LifecycleState::Running;
        }

        let events = self.monitor.subscribe_to_pool_events()?;
        let health_task = self.health.start_periodic(
            std::time::Duration::from_millis(self.config.health.check_interval_ms),
        );
        let leak_tasks = self.leaks.start_leak_detection(
            std::time::Duration::from_millis(self.config.leak.check_interval_ms),
            std::time::Duration::from_millis(self.config.leak.fix_interval_ms),
        );

        let mut tasks = self.tasks.lock();
        tasks.events = Some(events);
        tasks.health = Some(health_task);
        tasks.leak_check = Some(leak_tasks.check);
        tasks.leak_fix = Some(leak_tasks.fix);

        info!(
            health_interval_ms = self.config.health.check_interval_ms,
            leak_check_interval_ms = self.config.leak.check_interval_ms,
            leak_fix_interval_ms = self.config.leak.fix_interval_ms,
            "Pool guard initialized"
        );
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn monitor(&self) -> &Arc<PoolMonitor> {
        &self.monitor
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn leaks(&self) -> &Arc<LeakDetector> {
        &self.leaks
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn timeouts(&self) -> &TimeoutGuard {
        &self.timeouts
    }

    /// Register one unit of in-flight request work.
    ///
    /// Returns `None` unless the service is running: a draining service
    /// refuses new work. Drop the guard when the request settles.
    pub fn begin_request(&self) -> Option<InFlightGuard> {
        // The increment must happen under the state lock. Otherwise a
        // shutdown could claim Draining and observe a zero count in the
        // window between our check and the fetch_add, closing the pool
        // underneath the admitted request.
        let state = self.state.lock();
        if *state != LifecycleState::Running {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        drop(state);
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            settled: Arc::clone(&self.settled),
        })
    }

    /// Currently registered in-flight work units.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Snapshot everything into a serializable status document.
    ///
    /// The pool section is `None` when the pool is unavailable rather than
    /// failing the whole report.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            state: self.state(),
            pool: self.monitor.snapshot().ok(),
            metrics: self.monitor.metrics(),
            health: self.health.state(),
            errors: self.classifier.stats(),
            leaks: self.leaks.record(),
            in_flight: self.in_flight(),
        }
    }

    /// Gracefully stop the subsystem and close the pool.
    ///
    /// Idempotent: a second call (or a call racing another) returns once the
    /// first has claimed the transition. Always reaches `Stopped`, logging
    /// rather than propagating failures along the way.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Draining | LifecycleState::Stopped => return,
                _ => *state = LifecycleState::Draining,
            }
        }
        info!("Shutdown started, draining");

        // Stop timers first so no new checks race the teardown. Handles
        // already taken by a previous pass are simply absent.
        let (health_task, leak_check, leak_fix, events) = {
            let mut tasks = self.tasks.lock();
            (
                tasks.health.take(),
                tasks.leak_check.take(),
                tasks.leak_fix.take(),
                tasks.events.take(),
            )
        };
        let stops = [health_task, leak_check, leak_fix]
            .into_iter()
            .flatten()
            .map(PeriodicTask::stop);
        futures_util::future::join_all(stops).await;
        drop(events);

        // Final forced leak-fix pass while the pool is still attached.
        match self.leaks.fix_leaks(true).await {
            Ok(result) => info!(fixed = result.fixed(), "Final leak-fix pass done"),
            Err(e) => warn!(error = %e, "Final leak-fix pass failed"),
        }

        // Bounded wait for in-flight work to settle.
        let deadline = self.config.shutdown.deadline();
        let settled = async {
            loop {
                let notified = self.settled.notified();
                if self.in_flight.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(deadline, settled).await.is_err() {
            warn!(
                abandoned = self.in_flight.load(Ordering::Acquire),
                deadline_ms = self.config.shutdown.deadline_ms,
                "Shutdown deadline exceeded, abandoning in-flight work"
            );
        }

        // Detach before closing so late readers see PoolUnavailable.
        let pool = self.shared.write().take();
        if let Some(pool) = pool {
            if let Err(e) = pool.close().await {
                error!(error = %e, "Closing the pool failed");
            }
        }

        *self.state.lock() = LifecycleState::Stopped;
        info!("Shutdown complete");
    }
}

/// RAII token for one in-flight request; dropping it settles the count.
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
    settled: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.settled.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::pool::FakePool;

    #[tokio::test]
    async fn initialize_twice_is_rejected() {
        let pool = FakePool::with_capacity(10);
        let guard = PoolGuard::new(Config::default());

        guard.initialize(pool.clone()).unwrap();
        assert!(guard.initialize(pool.clone()).is_err());
        guard.shutdown().await;
    }

    #[tokio::test]
    async fn begin_request_refused_before_initialize() {
        let guard = PoolGuard::new(Config::default());
        assert!(guard.begin_request().is_none());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let pool = FakePool::with_capacity(10);
        let guard = PoolGuard::new(Config::default());
        guard.initialize(pool.clone()).unwrap();

        guard.shutdown().await;
        assert_eq!(guard.state(), LifecycleState::Stopped);
        guard.shutdown().await;
        assert_eq!(guard.state(), LifecycleState::Stopped);
        // Only the single forced pass drained.
        assert_eq!(guard.leaks().record().auto_fix_count, 1);
    }

    #[tokio::test]
    async fn in_flight_guard_settles_on_drop() {
        let pool = FakePool::with_capacity(10);
        let guard = PoolGuard::new(Config::default());
        guard.initialize(pool.clone()).unwrap();

        let token = guard.begin_request().unwrap();
        assert_eq!(guard.in_flight(), 1);
        drop(token);
        assert_eq!(guard.in_flight(), 0);
        guard.shutdown().await;
    }

    #[tokio::test]
    async fn status_report_serializes() {
        let pool = FakePool::with_capacity(10);
        pool.set_counters(2, 8);
        let guard = PoolGuard::new(Config::default());
        guard.initialize(pool.clone()).unwrap();

        let json = serde_json::to_value(guard.status()).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["pool"]["used"], 2);
        assert!(json["health"].is_object());
        assert!(json["errors"].is_object());
        assert!(json["leaks"].is_object());
        guard.shutdown().await;
    }
}
