//! Heuristic connection-leak detection and self-healing.
//!
//! The detector samples pool snapshots into a bounded rolling history and
//! flags sustained high utilization with no recovery in free capacity. It
//! deliberately never attributes leaks to call sites: aggregate trends are
//! enough to catch systemic leaks (a path that never releases) without
//! per-connection instrumentation cost.
//!
//! The auto-fix pass only acts after the signal persists across several
//! checks, so a transient burst of load does not trigger a drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LeakConfig;
use crate::error::DbResult;
use crate::monitor::PoolMonitor;
use crate::pool::{active_pool, PoolSnapshot, SharedPool};
use crate::task::PeriodicTask;

/// Running record of detections and automatic fixes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PotentialLeakRecord {
    pub detection_count: u64,
    pub last_detected_at: Option<DateTime<Utc>>,
    pub auto_fix_count: u64,
    pub last_auto_fix_at: Option<DateTime<Utc>>,
}

/// Outcome of one detection pass.
#[derive(Debug, Clone)]
pub enum LeakCheckResult {
    /// Not enough samples accumulated to evaluate the heuristic.
    InsufficientHistory { samples: usize },
    /// The heuristic ran over a full window.
    Evaluated(LeakEvaluation),
}

impl LeakCheckResult {
    pub fn leak_detected(&self) -> bool {
        match self {
            LeakCheckResult::InsufficientHistory { .. } => false,
            LeakCheckResult::Evaluated(eval) => eval.leak_detected,
        }
    }
}

/// Heuristic inputs and verdict for one evaluated window.
#[derive(Debug, Clone)]
pub struct LeakEvaluation {
    pub leak_detected: bool,
    /// Samples in the window with utilization above the threshold.
    pub high_usage_count: usize,
    /// Samples in the window with zero free connections.
    pub low_free_count: usize,
    /// Usage grew while free capacity never recovered across the window.
    pub growing: bool,
    /// The snapshot appended by this pass.
    pub snapshot: PoolSnapshot,
}

/// Outcome of a fix pass.
#[derive(Debug, Clone)]
pub enum FixResult {
    /// No leak detected and not forced; nothing was drained.
    Skipped { check: LeakCheckResult },
    /// Idle connections were drained.
    Fixed {
        drained: usize,
        before: PoolSnapshot,
        after: PoolSnapshot,
    },
}

impl FixResult {
    pub fn fixed(&self) -> bool {
        matches!(self, FixResult::Fixed { .. })
    }
}

/// Handles for the two periodic leak tasks.
#[derive(Debug)]
pub struct LeakDetectionTasks {
    pub check: PeriodicTask,
    pub fix: PeriodicTask,
}

/// Samples pool snapshots and applies the leak heuristic.
pub struct LeakDetector {
    pool: SharedPool,
    monitor: Arc<PoolMonitor>,
    config: LeakConfig,
    history: Mutex<VecDeque<PoolSnapshot>>,
    record: Mutex<PotentialLeakRecord>,
    /// Verdict of the most recent check, consulted by the auto-fix guard.
    last_leak_detected: AtomicBool,
}

impl LeakDetector {
    pub fn new(pool: SharedPool, monitor: Arc<PoolMonitor>, config: LeakConfig) -> Self {
        let capacity = config.history_capacity;
        Self {
            pool,
            monitor,
            config,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            record: Mutex::new(PotentialLeakRecord::default()),
            last_leak_detected: AtomicBool::new(false),
        }
    }

    /// Append a fresh snapshot to the history and evaluate the heuristic.
    ///
    /// Requires a full window of samples; until then the verdict is always
    /// "no leak". On detection, the running record is updated and a warning
    /// is emitted with the supporting counts.
    pub fn check_for_leaks(&self) -> DbResult<LeakCheckResult> {
        let snapshot = self.monitor.snapshot()?;

        let mut history = self.history.lock();
        if history.len() == self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(snapshot);

        if history.len() < self.config.window {
            self.last_leak_detected.store(false, Ordering::Relaxed);
            return Ok(LeakCheckResult::InsufficientHistory {
                samples: history.len(),
            });
        }

        let window: Vec<PoolSnapshot> = history
            .iter()
            .skip(history.len() - self.config.window)
            .copied()
            .collect();
        drop(history);

        let high_usage_count = window
            .iter()
            .filter(|s| s.utilization() > self.config.high_utilization)
            .count();
        let low_free_count = window.iter().filter(|s| s.free == 0).count();
        let oldest = &window[0];
        let newest = &window[window.len() - 1];
        let growing = newest.used > oldest.used && newest.free <= oldest.free;

        let leak_detected = (high_usage_count >= self.config.trigger_count
            || low_free_count >= self.config.trigger_count)
            && growing;

        self.last_leak_detected
            .store(leak_detected, Ordering::Relaxed);

        if leak_detected {
            let detection_count = {
                let mut record = self.record.lock();
                record.detection_count += 1;
                record.last_detected_at = Some(Utc::now());
                record.detection_count
            };
            warn!(
                high_usage_count,
                low_free_count,
                growing,
                detection_count,
                used = snapshot.used,
                free = snapshot.free,
                max_capacity = snapshot.max_capacity,
                "Potential connection leak detected"
            );
        } else {
            debug!(
                high_usage_count,
                low_free_count, growing, "Leak check passed"
            );
        }

        Ok(LeakCheckResult::Evaluated(LeakEvaluation {
            leak_detected,
            high_usage_count,
            low_free_count,
            growing,
            snapshot,
        }))
    }

    /// Drain idle connections if a leak is detected (or when forced).
    ///
    /// Re-runs the detection pass first; when neither it nor `force` calls
    /// for action, this is a no-op apart from the appended history sample.
    pub async fn fix_leaks(&self, force: bool) -> DbResult<FixResult> {
        let check = self.check_for_leaks()?;
        if !check.leak_detected() && !force {
            return Ok(FixResult::Skipped { check });
        }

        let pool = active_pool(&self.pool)?;
        let before = self.monitor.snapshot()?;
        let drained = pool.drain_idle().await?;
        let after = self.monitor.snapshot()?;

        {
            let mut record = self.record.lock();
            record.auto_fix_count += 1;
            record.last_auto_fix_at = Some(Utc::now());
        }

        info!(
            drained,
            forced = force,
            free_before = before.free,
            free_after = after.free,
            "Drained idle connections"
        );

        Ok(FixResult::Fixed {
            drained,
            before,
            after,
        })
    }

    /// Copy out the detection/fix record.
    pub fn record(&self) -> PotentialLeakRecord {
        self.record.lock().clone()
    }

    /// Start the periodic check and the guarded periodic auto-fix.
    ///
    /// The fix pass only calls [`fix_leaks`](Self::fix_leaks) once the leak
    /// signal has persisted: the latest check flagged a leak and the total
    /// detection count has reached `detections_before_autofix`.
    pub fn start_leak_detection(
        self: &Arc<Self>,
        check_interval: Duration,
        fix_interval: Duration,
    ) -> LeakDetectionTasks {
        let detector = Arc::clone(self);
        let check = PeriodicTask::spawn("leak-check", check_interval, move || {
            let detector = Arc::clone(&detector);
            async move {
                if let Err(e) = detector.check_for_leaks() {
                    warn!(error = %e, "Leak check failed");
                }
            }
        });

        let detector = Arc::clone(self);
        let fix = PeriodicTask::spawn("leak-fix", fix_interval, move || {
            let detector = Arc::clone(&detector);
            async move {
                let suspected = detector.last_leak_detected.load(Ordering::Relaxed);
                let detections = detector.record.lock().detection_count;
                if !suspected || detections < detector.config.detections_before_autofix {
                    return;
                }
                match detector.fix_leaks(false).await {
                    Ok(result) if result.fixed() => {}
                    Ok(_) => debug!("Auto-fix pass found nothing to drain"),
                    Err(e) => warn!(error = %e, "Auto-fix pass failed"),
                }
            }
        });

        LeakDetectionTasks { check, fix }
    }
}
