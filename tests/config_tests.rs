//! Configuration loading from files.

use std::io::Write;

use poolguard::config::Config;

#[test]
fn load_reads_and_validates_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [timeouts]
        query_timeout_ms = 15000

        [shutdown]
        deadline_ms = 5000

        [logging]
        level = "debug"
        format = "json"
        "#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.timeouts.query_timeout_ms, 15_000);
    assert_eq!(config.timeouts.transaction_timeout_ms, 60_000);
    assert_eq!(config.shutdown.deadline_ms, 5_000);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn load_rejects_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[leak]\nhigh_utilization = 0.0").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn load_reports_missing_file() {
    let result = Config::load("/nonexistent/poolguard.toml");
    assert!(result.is_err());
}
