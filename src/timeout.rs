//! Deadline enforcement around queries and transactions.
//!
//! Queries are raced against a timer. The race is cooperative: when the
//! timer wins, the guarded future is dropped and its result discarded, but
//! any work already issued to the database keeps running server-side. That
//! trade-off is deliberate: forcibly cancelling server-side work would need
//! driver support this crate does not assume.
//!
//! Transactions instead hand the deadline to the persistence layer's own
//! transaction-scoping primitive, which aborts past-deadline transactions
//! itself and so avoids dangling transactions entirely.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::TimeoutConfig;
use crate::error::{DbError, DbResult};
use crate::health::HealthChecker;
use crate::monitor::PoolMonitor;

/// Wraps individual queries and transactions with deadlines.
pub struct TimeoutGuard {
    monitor: Arc<PoolMonitor>,
    health: Arc<HealthChecker>,
    config: TimeoutConfig,
}

impl TimeoutGuard {
    pub fn new(
        monitor: Arc<PoolMonitor>,
        health: Arc<HealthChecker>,
        config: TimeoutConfig,
    ) -> Self {
        Self {
            monitor,
            health,
            config,
        }
    }

    /// Race `operation` against a deadline.
    ///
    /// If the operation settles first its result comes back unchanged. If
    /// the timer fires first, the in-flight query text, pool state, and the
    /// configured timeout are logged, an asynchronous health check is
    /// scheduled, and the caller gets [`DbError::QueryTimeout`]. The
    /// operation itself is dropped, not cancelled server-side (see module
    /// docs).
    ///
    /// `timeout` overrides the configured default when given.
    pub async fn with_query_timeout<T, F>(
        &self,
        query_text: &str,
        timeout: Option<Duration>,
        operation: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let timeout = timeout.unwrap_or_else(|| self.config.query_timeout());
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                let snapshot = self.monitor.snapshot().ok();
                warn!(
                    query = query_text,
                    timeout_ms,
                    used = snapshot.map(|s| s.used),
                    free = snapshot.map(|s| s.free),
                    pending_acquires = snapshot.map(|s| s.pending_acquires),
                    "Query timed out; operation abandoned but not cancelled server-side"
                );
                self.spawn_health_check();
                Err(DbError::QueryTimeout { timeout_ms })
            }
        }
    }

    /// Run a transaction with the deadline enforced by the persistence layer.
    ///
    /// The effective timeout is handed to `transaction` so the transaction
    /// scope itself aborts past the deadline. A returned
    /// [`DbError::TransactionTimeout`] is logged and triggers the same
    /// asynchronous health check as a query timeout.
    pub async fn with_transaction_timeout<T, F, Fut>(
        &self,
        timeout: Option<Duration>,
        transaction: F,
    ) -> DbResult<T>
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let timeout = timeout.unwrap_or_else(|| self.config.transaction_timeout());
        let result = transaction(timeout).await;
        if let Err(DbError::TransactionTimeout { timeout_ms }) = &result {
            warn!(timeout_ms, "Transaction aborted at deadline");
            self.spawn_health_check();
        }
        result
    }

    fn spawn_health_check(&self) {
        let health = Arc::clone(&self.health);
        tokio::spawn(async move {
            let result = health.check_health().await;
            if !result.healthy {
                warn!(
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Post-timeout health check failed"
                );
            }
        });
    }
}
