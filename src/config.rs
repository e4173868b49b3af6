//! Configuration loading and validation.
//!
//! All settings have serde defaults so an empty TOML file (or no file at
//! all) yields a working configuration. Heuristic thresholds for leak
//! detection are deliberately configuration rather than hard-coded logic so
//! deployments can tune them.
//!
//! # Example
//!
//! ```no_run
//! use poolguard::config::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("poolguard.toml")?;
//!     config.logging.init();
//!     Ok(())
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ConfigError, Result};

/// Query and transaction deadline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for a single guarded query (milliseconds).
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Deadline handed to the transaction-scoping primitive (milliseconds).
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
}

const fn default_query_timeout_ms() -> u64 {
    30_000
}

const fn default_transaction_timeout_ms() -> u64 {
    60_000
}

impl TimeoutConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
        }
    }
}

/// Periodic liveness-check configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Interval between scheduled health checks (milliseconds).
    #[serde(default = "default_health_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Connection-kind errors between auto-triggered health checks.
    #[serde(default = "default_connection_error_trigger")]
    pub connection_error_trigger: u64,
}

const fn default_health_check_interval_ms() -> u64 {
    60_000
}

const fn default_connection_error_trigger() -> u64 {
    5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_health_check_interval_ms(),
            connection_error_trigger: default_connection_error_trigger(),
        }
    }
}

/// Leak-detection heuristic configuration.
///
/// The thresholds (0.7 utilization, 8 of 10 samples, 3 consecutive
/// detections) are empirically chosen starting points, not derived values.
#[derive(Debug, Clone, Deserialize)]
pub struct LeakConfig {
    /// Interval between leak checks (milliseconds).
    #[serde(default = "default_leak_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Interval between guarded auto-fix passes (milliseconds).
    #[serde(default = "default_leak_fix_interval_ms")]
    pub fix_interval_ms: u64,
    /// Maximum retained snapshots (FIFO eviction beyond this).
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Number of most-recent samples the heuristic evaluates.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Utilization above which a sample counts as high usage.
    #[serde(default = "default_high_utilization")]
    pub high_utilization: f64,
    /// Samples within the window that must trip a condition.
    #[serde(default = "default_trigger_count")]
    pub trigger_count: usize,
    /// Detections required before the periodic auto-fix acts.
    #[serde(default = "default_detections_before_autofix")]
    pub detections_before_autofix: u64,
}

const fn default_leak_check_interval_ms() -> u64 {
    30_000
}

const fn default_leak_fix_interval_ms() -> u64 {
    300_000 // 5 minutes
}

const fn default_history_capacity() -> usize {
    100
}

const fn default_window() -> usize {
    10
}

const fn default_high_utilization() -> f64 {
    0.7
}

const fn default_trigger_count() -> usize {
    8
}

const fn default_detections_before_autofix() -> u64 {
    3
}

impl Default for LeakConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_leak_check_interval_ms(),
            fix_interval_ms: default_leak_fix_interval_ms(),
            history_capacity: default_history_capacity(),
            window: default_window(),
            high_utilization: default_high_utilization(),
            trigger_count: default_trigger_count(),
            detections_before_autofix: default_detections_before_autofix(),
        }
    }
}

/// Graceful-shutdown configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Hard deadline for in-flight work to settle (milliseconds). Remaining
    /// work is abandoned once this elapses.
    #[serde(default = "default_shutdown_deadline_ms")]
    pub deadline_ms: u64,
}

const fn default_shutdown_deadline_ms() -> u64 {
    10_000
}

impl ShutdownConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_shutdown_deadline_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl LoggingConfig {
    /// Initialize the tracing subscriber with this logging configuration.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Main configuration.
///
/// Aggregates all subsystem settings. Load from a TOML file with
/// [`Config::load`] or parse directly with [`Config::parse_toml`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub leak: LeakConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file, validating the result.
    ///
    /// Loads `.env` first so `RUST_LOG` and friends are available when the
    /// subscriber initializes.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let content = fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        fn nonzero(field: &'static str, value: u64) -> std::result::Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
            Ok(())
        }

        nonzero("timeouts.query_timeout_ms", self.timeouts.query_timeout_ms)?;
        nonzero(
            "timeouts.transaction_timeout_ms",
            self.timeouts.transaction_timeout_ms,
        )?;
        nonzero("health.check_interval_ms", self.health.check_interval_ms)?;
        nonzero(
            "health.connection_error_trigger",
            self.health.connection_error_trigger,
        )?;
        nonzero("leak.check_interval_ms", self.leak.check_interval_ms)?;
        nonzero("leak.fix_interval_ms", self.leak.fix_interval_ms)?;
        nonzero("leak.window", self.leak.window as u64)?;
        nonzero("leak.history_capacity", self.leak.history_capacity as u64)?;
        nonzero("shutdown.deadline_ms", self.shutdown.deadline_ms)?;

        if self.leak.window > self.leak.history_capacity {
            return Err(ConfigError::InvalidValue {
                field: "leak.window",
                reason: format!(
                    "window ({}) exceeds history capacity ({})",
                    self.leak.window, self.leak.history_capacity
                ),
            }
            .into());
        }
        if self.leak.trigger_count > self.leak.window {
            return Err(ConfigError::InvalidValue {
                field: "leak.trigger_count",
                reason: format!(
                    "trigger count ({}) exceeds window ({})",
                    self.leak.trigger_count, self.leak.window
                ),
            }
            .into());
        }
        if !(self.leak.high_utilization > 0.0 && self.leak.high_utilization <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "leak.high_utilization",
                reason: format!("{} is outside (0, 1]", self.leak.high_utilization),
            }
            .into());
        }

        Ok(())
    }
}
