//! The seam between this crate and the persistence layer.
//!
//! Everything here is deliberately opaque: the crate never touches driver
//! types, only the [`DatabasePool`] trait. Production code wraps its real
//! pool in an adapter; tests inject a fake (see the `testkit` feature) and
//! fire synthetic [`PoolEvent`]s deterministically.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::DbResult;

/// Instantaneous counters reported by the underlying pool.
///
/// Raw values straight from the driver; [`PoolSnapshot`] adds the timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    /// Connections currently checked out.
    pub used: u32,
    /// Idle connections available for checkout.
    pub free: u32,
    /// Callers waiting for a connection.
    pub pending_acquires: u32,
    /// Connections currently being established.
    pub pending_creates: u32,
    /// Hard upper bound on pool size.
    pub max_capacity: u32,
}

/// An immutable point-in-time read of pool state.
///
/// Produced fresh on every read and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub used: u32,
    pub free: u32,
    pub total: u32,
    pub pending_acquires: u32,
    pub pending_creates: u32,
    pub max_capacity: u32,
    pub at: DateTime<Utc>,
}

impl PoolSnapshot {
    /// Build a snapshot from raw counters, stamped with the current time.
    pub fn from_counters(c: PoolCounters) -> Self {
        Self {
            used: c.used,
            free: c.free,
            total: c.used + c.free,
            pending_acquires: c.pending_acquires,
            pending_creates: c.pending_creates,
            max_capacity: c.max_capacity,
            at: Utc::now(),
        }
    }

    /// Fraction of capacity in use, 0.0 when capacity is unknown.
    pub fn utilization(&self) -> f64 {
        if self.max_capacity == 0 {
            return 0.0;
        }
        f64::from(self.used) / f64::from(self.max_capacity)
    }

    /// Counter equality, ignoring the timestamp.
    pub fn same_counters(&self, other: &PoolSnapshot) -> bool {
        self.used == other.used
            && self.free == other.free
            && self.pending_acquires == other.pending_acquires
            && self.pending_creates == other.pending_creates
            && self.max_capacity == other.max_capacity
    }
}

/// Lifecycle events emitted by the underlying pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// A caller requested a connection from the pool.
    AcquireRequested,
    /// A connection was returned to the pool.
    Released,
    /// The pool started establishing a new physical connection.
    CreateRequested,
    /// The pool started tearing down a physical connection.
    DestroyRequested,
    /// A checkout attempt failed (exhaustion, wait timeout).
    AcquireFailed,
    /// Establishing a new physical connection failed.
    CreateFailed,
}

/// Receiver for [`PoolEvent`]s.
///
/// Implementations must be cheap and non-blocking: events fire from hot
/// acquisition paths.
pub trait PoolEventListener: Send + Sync {
    fn on_event(&self, event: PoolEvent);
}

/// Cancellation token returned by [`DatabasePool::subscribe`].
///
/// Cancelling is idempotent; dropping the token also cancels.
pub struct EventSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A token that is already cancelled; useful for fakes.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Unregister the listener. Safe to call once; later drops are no-ops.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Minimal surface this crate requires from a connection pool.
///
/// The trait is object safe so it can sit behind [`SharedPool`] and be
/// swapped for a fake in tests.
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Read the pool's instantaneous counters.
    fn counters(&self) -> DbResult<PoolCounters>;

    /// Register a lifecycle-event listener.
    fn subscribe(&self, listener: Arc<dyn PoolEventListener>) -> EventSubscription;

    /// One trivial round-trip query (`SELECT 1` or equivalent).
    async fn ping(&self) -> DbResult<()>;

    /// Close idle connections, returning how many were drained.
    async fn drain_idle(&self) -> DbResult<usize>;

    /// Terminally close the pool.
    async fn close(&self) -> DbResult<()>;
}

/// The initialize/shutdown lifecycle slot holding the active pool.
///
/// Empty before `initialize` and after `shutdown`; readers observe
/// [`DbError::PoolUnavailable`](crate::error::DbError::PoolUnavailable)
/// rather than panicking.
pub type SharedPool = Arc<RwLock<Option<Arc<dyn DatabasePool>>>>;

/// Fetch the active pool handle or report it unavailable.
pub fn active_pool(shared: &SharedPool) -> DbResult<Arc<dyn DatabasePool>> {
    shared
        .read()
        .as_ref()
        .cloned()
        .ok_or(crate::error::DbError::PoolUnavailable)
}
