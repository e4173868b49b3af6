//! Pool observation: snapshots and cumulative event accounting.
//!
//! [`PoolMonitor`] is the single component that talks to the pool's counter
//! and event surfaces. Other components derive everything they need from its
//! snapshots, so the rest of the crate never touches the pool for
//! observability purposes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::DbResult;
use crate::pool::{
    active_pool, EventSubscription, PoolEvent, PoolEventListener, PoolSnapshot, SharedPool,
};

/// Cumulative pool-event counters.
///
/// Updated atomically from event callbacks, which may fire from any number
/// of concurrent acquisition paths.
#[derive(Debug, Default)]
struct CumulativeMetrics {
    acquires: AtomicU64,
    releases: AtomicU64,
    creates: AtomicU64,
    destroys: AtomicU64,
    failed_acquires: AtomicU64,
    failed_creates: AtomicU64,
    max_used_ever: AtomicU64,
}

/// Read-only copy of the cumulative metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsReport {
    pub acquires: u64,
    pub releases: u64,
    pub creates: u64,
    pub destroys: u64,
    pub failed_acquires: u64,
    pub failed_creates: u64,
    pub max_used_ever: u64,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Observes the pool: point-in-time snapshots plus cumulative event tallies.
pub struct PoolMonitor {
    pool: SharedPool,
    metrics: CumulativeMetrics,
    last_checked_at: Mutex<Option<DateTime<Utc>>>,
    /// Utilization above which an acquire/create failure logs a warning.
    high_utilization: f64,
}

impl PoolMonitor {
    pub fn new(pool: SharedPool, high_utilization: f64) -> Self {
        Self {
            pool,
            metrics: CumulativeMetrics::default(),
            last_checked_at: Mutex::new(None),
            high_utilization,
        }
    }

    /// Read a fresh snapshot of the pool's counters.
    ///
    /// Also bumps `max_used_ever` when the observed total sets a new high
    /// water mark, and stamps `last_checked_at`.
    pub fn snapshot(&self) -> DbResult<PoolSnapshot> {
        let pool = active_pool(&self.pool)?;
        let snap = PoolSnapshot::from_counters(pool.counters()?);
        self.metrics
            .max_used_ever
            .fetch_max(u64::from(snap.total), Ordering::Relaxed);
        *self.last_checked_at.lock() = Some(snap.at);
        Ok(snap)
    }

    /// Register for pool lifecycle events, tallying each into the metrics.
    ///
    /// On acquire/create failures, additionally samples the pool and warns
    /// when utilization is above the configured threshold. The returned
    /// token unregisters when cancelled or dropped.
    pub fn subscribe_to_pool_events(self: &Arc<Self>) -> DbResult<EventSubscription> {
        let pool = active_pool(&self.pool)?;
        let listener = Arc::new(MetricsListener {
            monitor: Arc::downgrade(self),
        });
        debug!("Subscribed to pool lifecycle events");
        Ok(pool.subscribe(listener))
    }

    /// Copy out the current cumulative metrics.
    pub fn metrics(&self) -> MetricsReport {
        MetricsReport {
            acquires: self.metrics.acquires.load(Ordering::Relaxed),
            releases: self.metrics.releases.load(Ordering::Relaxed),
            creates: self.metrics.creates.load(Ordering::Relaxed),
            destroys: self.metrics.destroys.load(Ordering::Relaxed),
            failed_acquires: self.metrics.failed_acquires.load(Ordering::Relaxed),
            failed_creates: self.metrics.failed_creates.load(Ordering::Relaxed),
            max_used_ever: self.metrics.max_used_ever.load(Ordering::Relaxed),
            last_checked_at: *self.last_checked_at.lock(),
        }
    }

    /// Zero every cumulative counter. Snapshot reads are unaffected.
    pub fn reset_metrics(&self) {
        self.metrics.acquires.store(0, Ordering::Relaxed);
        self.metrics.releases.store(0, Ordering::Relaxed);
        self.metrics.creates.store(0, Ordering::Relaxed);
        self.metrics.destroys.store(0, Ordering::Relaxed);
        self.metrics.failed_acquires.store(0, Ordering::Relaxed);
        self.metrics.failed_creates.store(0, Ordering::Relaxed);
        self.metrics.max_used_ever.store(0, Ordering::Relaxed);
        *self.last_checked_at.lock() = None;
        debug!("Cumulative pool metrics reset");
    }

    fn record_event(&self, event: PoolEvent) {
        let counter = match event {
            PoolEvent::AcquireRequested => &self.metrics.acquires,
            PoolEvent::Released => &self.metrics.releases,
            PoolEvent::CreateRequested => &self.metrics.creates,
            PoolEvent::DestroyRequested => &self.metrics.destroys,
            PoolEvent::AcquireFailed => &self.metrics.failed_acquires,
            PoolEvent::CreateFailed => &self.metrics.failed_creates,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if matches!(event, PoolEvent::AcquireFailed | PoolEvent::CreateFailed) {
            self.warn_if_saturated(event);
        }
    }

    fn warn_if_saturated(&self, event: PoolEvent) {
        let Ok(snap) = self.snapshot() else {
            return;
        };
        if snap.utilization() > self.high_utilization {
            warn!(
                event = ?event,
                used = snap.used,
                free = snap.free,
                max_capacity = snap.max_capacity,
                utilization = snap.utilization(),
                "Pool failure under high utilization"
            );
        }
    }
}

/// Event listener holding a weak reference back to the monitor.
///
/// Weak so an unsubscribed-but-leaked listener cannot keep the monitor (and
/// the pool handle behind it) alive.
struct MetricsListener {
    monitor: Weak<PoolMonitor>,
}

impl PoolEventListener for MetricsListener {
    fn on_event(&self, event: PoolEvent) {
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.record_event(event);
        }
    }
}
