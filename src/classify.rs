//! Error classification and accounting.
//!
//! Every database failure in the service funnels through
//! [`ErrorClassifier::classify`], which tallies it, enriches it with the
//! current pool snapshot, and hands it back; classification never swallows
//! or replaces the caller's failure. Only
//! [`handle_unhandled_error`](ErrorClassifier::handle_unhandled_error)
//! converts failures into a caller-facing payload, and then deliberately a
//! generic one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DbError, ErrorKind};
use crate::health::HealthChecker;
use crate::monitor::PoolMonitor;
use crate::pool::PoolSnapshot;

/// Code recorded when an error carries none.
const UNKNOWN_CODE: &str = "UNKNOWN";

/// Driver codes and message fragments that identify a database failure in an
/// otherwise opaque error, used by the unhandled-error hook.
const KNOWN_FAILURE_CODES: &[&str] = &["ECONNREFUSED", "ECONNRESET", "ETIMEDOUT", "EPIPE"];
const KNOWN_FAILURE_FRAGMENTS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection terminated",
    "timed out",
    "timeout",
    "pool is not initialized",
    "too many connections",
];

/// Concurrent error counters.
struct ErrorStats {
    total: AtomicU64,
    by_kind: DashMap<ErrorKind, u64>,
    by_code: DashMap<String, u64>,
    last_error: Mutex<Option<LastError>>,
}

#[derive(Debug, Clone, Serialize)]
struct LastError {
    message: String,
    at: DateTime<Utc>,
}

impl ErrorStats {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            by_kind: DashMap::new(),
            by_code: DashMap::new(),
            last_error: Mutex::new(None),
        }
    }

    /// Record one error, returning the new count for its kind.
    fn record(&self, kind: ErrorKind, code: &str, message: &str) -> u64 {
        self.total.fetch_add(1, Ordering::Relaxed);
        let kind_count = {
            let mut entry = self.by_kind.entry(kind).or_insert(0);
            *entry += 1;
            *entry
        };
        *self.by_code.entry(code.to_string()).or_insert(0) += 1;
        *self.last_error.lock() = Some(LastError {
            message: message.to_string(),
            at: Utc::now(),
        });
        kind_count
    }

    fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.by_kind.clear();
        self.by_code.clear();
        *self.last_error.lock() = None;
    }
}

/// Read-only copy of the error counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatsReport {
    pub total_errors: u64,
    pub counts_by_kind: std::collections::HashMap<&'static str, u64>,
    pub counts_by_code: std::collections::HashMap<String, u64>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl ErrorStatsReport {
    pub fn count_for_kind(&self, kind: ErrorKind) -> u64 {
        self.counts_by_kind.get(kind.as_str()).copied().unwrap_or(0)
    }
}

/// The original error enriched with classification context.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub error: DbError,
    pub kind: ErrorKind,
    pub code: String,
    pub context: String,
    /// Pool state at classification time, for downstream logging.
    pub pool_status: Option<PoolSnapshot>,
    pub at: DateTime<Utc>,
}

/// Generic caller-facing payload concealing internal failure detail.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceUnavailable {
    pub status: u16,
    pub error: &'static str,
    pub message: &'static str,
}

impl ServiceUnavailable {
    fn new() -> Self {
        Self {
            status: 503,
            error: "service_unavailable",
            message: "The service is temporarily unavailable, please try again later.",
        }
    }
}

/// Categorizes database errors and maintains [`ErrorStatsReport`] counters.
pub struct ErrorClassifier {
    stats: ErrorStats,
    monitor: Arc<PoolMonitor>,
    health: Arc<HealthChecker>,
    /// Connection-kind errors between auto-triggered health checks.
    connection_error_trigger: u64,
}

impl ErrorClassifier {
    pub fn new(
        monitor: Arc<PoolMonitor>,
        health: Arc<HealthChecker>,
        connection_error_trigger: u64,
    ) -> Self {
        Self {
            stats: ErrorStats::new(),
            monitor,
            health,
            connection_error_trigger: connection_error_trigger.max(1),
        }
    }

    /// Classify and tally one error, enriching it with context and the
    /// current pool snapshot. Never fails.
    ///
    /// Every `connection_error_trigger`-th connection-kind error schedules
    /// an out-of-band health check; failures of that check are logged, not
    /// propagated.
    pub fn classify(&self, error: DbError, context: &str) -> ClassifiedError {
        self.classify_with_code(error, None, context)
    }

    /// [`classify`](Self::classify) with an explicit driver error code.
    pub fn classify_with_code(
        &self,
        error: DbError,
        code: Option<&str>,
        context: &str,
    ) -> ClassifiedError {
        let kind = match code {
            // An explicit code can refine an otherwise uncategorized error.
            Some(code) if error.kind() == ErrorKind::Other => {
                ErrorKind::from_signature(Some(code), &error.to_string())
            }
            _ => error.kind(),
        };
        let code = code.unwrap_or(UNKNOWN_CODE).to_string();
        let message = error.to_string();

        let kind_count = self.stats.record(kind, &code, &message);
        let pool_status = self.monitor.snapshot().ok();

        debug!(
            kind = %kind,
            code = %code,
            context,
            error = %message,
            "Classified database error"
        );

        if kind == ErrorKind::Connection && kind_count % self.connection_error_trigger == 0 {
            self.trigger_health_check(kind_count);
        }

        ClassifiedError {
            error,
            kind,
            code,
            context: context.to_string(),
            pool_status,
            at: Utc::now(),
        }
    }

    fn trigger_health_check(&self, connection_errors: u64) {
        warn!(
            connection_errors,
            "Connection-error threshold crossed, scheduling health check"
        );
        let health = Arc::clone(&self.health);
        tokio::spawn(async move {
            let result = health.check_health().await;
            if !result.healthy {
                warn!(
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Triggered health check failed"
                );
            }
        });
    }

    /// Global unhandled-error hook for the request-handling layer.
    ///
    /// Returns a generic 503 payload when the error carries a known
    /// database-failure signature, after classifying it for the counters.
    /// Anything else returns `None` so the next handler sees the error
    /// unchanged. Full detail stays in logs and stats; only the generic
    /// payload reaches the caller.
    pub fn handle_unhandled_error(
        &self,
        error: &(dyn std::error::Error + 'static),
    ) -> Option<ServiceUnavailable> {
        let message = error.to_string();
        let lowered = message.to_ascii_lowercase();

        let matched = KNOWN_FAILURE_CODES
            .iter()
            .any(|code| message.contains(code))
            || KNOWN_FAILURE_FRAGMENTS
                .iter()
                .any(|fragment| lowered.contains(fragment));
        if !matched {
            return None;
        }

        let classified = self.classify(DbError::Other(message), "unhandled-error-hook");
        warn!(
            kind = %classified.kind,
            error = %classified.error,
            "Unhandled database failure, responding with generic 503"
        );
        Some(ServiceUnavailable::new())
    }

    /// Copy out the current counters.
    pub fn stats(&self) -> ErrorStatsReport {
        let (last_error, last_error_at) = match self.stats.last_error.lock().clone() {
            Some(last) => (Some(last.message), Some(last.at)),
            None => (None, None),
        };
        ErrorStatsReport {
            total_errors: self.stats.total.load(Ordering::Relaxed),
            counts_by_kind: self
                .stats
                .by_kind
                .iter()
                .map(|entry| (entry.key().as_str(), *entry.value()))
                .collect(),
            counts_by_code: self
                .stats
                .by_code
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            last_error,
            last_error_at,
        }
    }

    /// Zero all counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
        debug!("Error stats reset");
    }
}
