//! A scriptable fake [`DatabasePool`] for deterministic tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::{DbError, DbResult};
use crate::pool::{
    DatabasePool, EventSubscription, PoolCounters, PoolEvent, PoolEventListener, SharedPool,
};

type ListenerMap = Arc<Mutex<HashMap<u64, Arc<dyn PoolEventListener>>>>;

/// In-memory pool double.
///
/// Counters can be set directly or scripted as a sequence consumed one read
/// at a time; events fire synchronously into registered listeners; pings can
/// be delayed or made to fail. Every operation is counted so tests can
/// assert exact interaction counts.
pub struct FakePool {
    counters: Mutex<PoolCounters>,
    scripted: Mutex<VecDeque<PoolCounters>>,
    listeners: ListenerMap,
    next_listener_id: AtomicU64,
    ping_failures: Mutex<VecDeque<String>>,
    ping_delay: Mutex<Duration>,
    ping_calls: AtomicU64,
    drain_calls: AtomicU64,
    closed: AtomicBool,
}

impl FakePool {
    /// A pool with the given capacity, no connections open.
    pub fn with_capacity(max_capacity: u32) -> Arc<Self> {
        Arc::new(Self {
            counters: Mutex::new(PoolCounters {
                max_capacity,
                ..PoolCounters::default()
            }),
            scripted: Mutex::new(VecDeque::new()),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener_id: AtomicU64::new(0),
            ping_failures: Mutex::new(VecDeque::new()),
            ping_delay: Mutex::new(Duration::ZERO),
            ping_calls: AtomicU64::new(0),
            drain_calls: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Wrap this pool in an initialized [`SharedPool`] slot.
    pub fn shared(self: &Arc<Self>) -> SharedPool {
        Arc::new(RwLock::new(Some(
            Arc::clone(self) as Arc<dyn DatabasePool>
        )))
    }

    /// Set the current used/free counters.
    pub fn set_counters(&self, used: u32, free: u32) {
        let mut counters = self.counters.lock();
        counters.used = used;
        counters.free = free;
    }

    /// Set the pending acquire/create counters.
    pub fn set_pending(&self, acquires: u32, creates: u32) {
        let mut counters = self.counters.lock();
        counters.pending_acquires = acquires;
        counters.pending_creates = creates;
    }

    /// Script a sequence of counter reads.
    ///
    /// Each read consumes the next entry and makes it current; once the
    /// script runs out, reads keep returning the final entry.
    pub fn script_counters(&self, sequence: Vec<PoolCounters>) {
        *self.scripted.lock() = sequence.into();
    }

    /// Make the next `n` pings fail with a connection error.
    pub fn script_ping_failures(&self, n: usize) {
        let mut failures = self.ping_failures.lock();
        for _ in 0..n {
            failures.push_back("ping failed: connection refused".into());
        }
    }

    /// Delay every ping by `delay` (virtual time under a paused runtime).
    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock() = delay;
    }

    /// Fire a synthetic lifecycle event into all registered listeners.
    pub fn fire(&self, event: PoolEvent) {
        let listeners: Vec<Arc<dyn PoolEventListener>> =
            self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn ping_calls(&self) -> u64 {
        self.ping_calls.load(Ordering::SeqCst)
    }

    pub fn drain_calls(&self) -> u64 {
        self.drain_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabasePool for FakePool {
    fn counters(&self) -> DbResult<PoolCounters> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Connection("pool is closed".into()));
        }
        let mut counters = self.counters.lock();
        if let Some(next) = self.scripted.lock().pop_front() {
            *counters = next;
        }
        Ok(*counters)
    }

    fn subscribe(&self, listener: Arc<dyn PoolEventListener>) -> EventSubscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(id, listener);
        let listeners = Arc::clone(&self.listeners);
        EventSubscription::new(move || {
            listeners.lock().remove(&id);
        })
    }

    async fn ping(&self) -> DbResult<()> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Connection("pool is closed".into()));
        }
        match self.ping_failures.lock().pop_front() {
            Some(message) => Err(DbError::Connection(message)),
            None => Ok(()),
        }
    }

    async fn drain_idle(&self) -> DbResult<usize> {
        self.drain_calls.fetch_add(1, Ordering::SeqCst);
        let mut counters = self.counters.lock();
        let drained = counters.free as usize;
        counters.free = 0;
        Ok(drained)
    }

    async fn close(&self) -> DbResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
