//! Periodic database liveness checking.
//!
//! A health check is one trivial round-trip query with its latency measured.
//! Failures are recorded into [`HealthState`], never raised: callers of the
//! periodic schedule observe state, they do not catch errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::pool::{active_pool, SharedPool};
use crate::task::PeriodicTask;

/// Rolling health state, updated atomically once per check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthState {
    pub last_check_at: Option<DateTime<Utc>>,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub response_time_ms: u64,
    pub total_checks: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
}

/// Outcome of a single check, returned to direct callers.
#[derive(Debug, Clone)]
pub struct HealthResult {
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// Issues liveness pings and maintains [`HealthState`].
pub struct HealthChecker {
    pool: SharedPool,
    state: RwLock<HealthState>,
}

impl HealthChecker {
    pub fn new(pool: SharedPool) -> Self {
        Self {
            pool,
            state: RwLock::new(HealthState::default()),
        }
    }

    /// Run one health check and record the outcome.
    ///
    /// An unreachable or uninitialized pool is a failed check, not an error:
    /// the result always comes back and the state always advances
    /// (`total_checks`, `last_check_at`, `response_time_ms`).
    pub async fn check_health(&self) -> HealthResult {
        let started = Instant::now();
        let outcome = match active_pool(&self.pool) {
            Ok(pool) => pool.ping().await,
            Err(e) => Err(e),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut state = self.state.write();
        state.last_check_at = Some(Utc::now());
        state.response_time_ms = elapsed_ms;
        state.total_checks += 1;

        match outcome {
            Ok(()) => {
                state.healthy = true;
                state.consecutive_failures = 0;
                state.last_error = None;
                debug!(response_time_ms = elapsed_ms, "Health check passed");
                HealthResult {
                    healthy: true,
                    response_time_ms: elapsed_ms,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                state.healthy = false;
                state.total_failures += 1;
                state.consecutive_failures += 1;
                state.last_error = Some(message.clone());
                warn!(
                    error = %message,
                    consecutive_failures = state.consecutive_failures,
                    response_time_ms = elapsed_ms,
                    "Health check failed"
                );
                HealthResult {
                    healthy: false,
                    response_time_ms: elapsed_ms,
                    error: Some(message),
                }
            }
        }
    }

    /// Copy out the current health state.
    pub fn state(&self) -> HealthState {
        self.state.read().clone()
    }

    /// Schedule [`check_health`](Self::check_health) on a fixed interval.
    ///
    /// Each call returns an independent handle; nothing here prevents a
    /// caller from double-scheduling.
    pub fn start_periodic(self: &Arc<Self>, interval: Duration) -> PeriodicTask {
        let checker = Arc::clone(self);
        PeriodicTask::spawn("health-check", interval, move || {
            let checker = Arc::clone(&checker);
            async move {
                checker.check_health().await;
            }
        })
    }
}
