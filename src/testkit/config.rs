//! Canonical test configurations.

use crate::config::{Config, HealthConfig, LeakConfig, ShutdownConfig, TimeoutConfig};

/// Config with millisecond-scale intervals for timer tests.
pub fn fast() -> Config {
    Config {
        timeouts: TimeoutConfig {
            query_timeout_ms: 50,
            transaction_timeout_ms: 100,
        },
        health: HealthConfig {
            check_interval_ms: 100,
            connection_error_trigger: 5,
        },
        leak: LeakConfig {
            check_interval_ms: 100,
            fix_interval_ms: 200,
            ..LeakConfig::default()
        },
        shutdown: ShutdownConfig { deadline_ms: 200 },
        ..Config::default()
    }
}

/// Leak config with a small window so tests need few samples.
pub fn small_window_leak() -> LeakConfig {
    LeakConfig {
        window: 3,
        trigger_count: 2,
        history_capacity: 10,
        ..LeakConfig::default()
    }
}
