//! Error classification, accounting, and the auto-triggered health check.

use std::sync::Arc;
use std::time::Duration;

use poolguard::classify::ErrorClassifier;
use poolguard::error::{DbError, ErrorKind};
use poolguard::health::HealthChecker;
use poolguard::monitor::PoolMonitor;
use poolguard::testkit::pool::FakePool;

fn classifier(pool: &Arc<FakePool>) -> ErrorClassifier {
    let monitor = Arc::new(PoolMonitor::new(pool.shared(), 0.7));
    let health = Arc::new(HealthChecker::new(pool.shared()));
    ErrorClassifier::new(monitor, health, 5)
}

// -- Taxonomy --------------------------------------------------------------

#[tokio::test]
async fn each_kind_counts_separately() {
    let pool = FakePool::with_capacity(10);
    let classifier = classifier(&pool);

    classifier.classify(DbError::Connection("refused".into()), "a");
    classifier.classify(DbError::QueryTimeout { timeout_ms: 1 }, "b");
    classifier.classify(DbError::TransactionTimeout { timeout_ms: 1 }, "c");
    classifier.classify(DbError::Transaction("rollback".into()), "d");
    classifier.classify(DbError::Query("syntax".into()), "e");
    classifier.classify(DbError::PoolUnavailable, "f");
    classifier.classify(DbError::Other("disk full".into()), "g");

    let stats = classifier.stats();
    assert_eq!(stats.total_errors, 7);
    for kind in [
        ErrorKind::Connection,
        ErrorKind::QueryTimeout,
        ErrorKind::TransactionTimeout,
        ErrorKind::Transaction,
        ErrorKind::Query,
        ErrorKind::PoolUnavailable,
        ErrorKind::Other,
    ] {
        assert_eq!(stats.count_for_kind(kind), 1, "kind {kind} miscounted");
    }
}

#[tokio::test]
async fn free_form_messages_classify_by_keyword() {
    let pool = FakePool::with_capacity(10);
    let classifier = classifier(&pool);

    let classified = classifier.classify(
        DbError::Other("connection refused by 10.0.0.5".into()),
        "checkout",
    );
    assert_eq!(classified.kind, ErrorKind::Connection);

    let classified = classifier.classify(DbError::Other("query planner gave up".into()), "report");
    assert_eq!(classified.kind, ErrorKind::Query);
}

#[tokio::test]
async fn codes_are_counted_with_unknown_default() {
    let pool = FakePool::with_capacity(10);
    let classifier = classifier(&pool);

    classifier.classify_with_code(DbError::Query("bad".into()), Some("42601"), "a");
    classifier.classify_with_code(DbError::Query("bad".into()), Some("42601"), "b");
    classifier.classify(DbError::Query("bad".into()), "c");

    let stats = classifier.stats();
    assert_eq!(stats.counts_by_code.get("42601"), Some(&2));
    assert_eq!(stats.counts_by_code.get("UNKNOWN"), Some(&1));
}

// -- Auto-triggered health check -------------------------------------------

#[tokio::test]
async fn fifth_connection_error_triggers_exactly_one_health_check() {
    let pool = FakePool::with_capacity(10);
    let classifier = classifier(&pool);

    for i in 0..5 {
        assert_eq!(pool.ping_calls(), 0, "premature trigger at error {i}");
        classifier.classify(
            DbError::Other("connection refused".into()),
            "request-handler",
        );
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(classifier.stats().count_for_kind(ErrorKind::Connection), 5);
    assert_eq!(pool.ping_calls(), 1);
}

#[tokio::test]
async fn trigger_repeats_at_every_multiple() {
    let pool = FakePool::with_capacity(10);
    let classifier = classifier(&pool);

    for _ in 0..10 {
        classifier.classify(DbError::Connection("refused".into()), "x");
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.ping_calls(), 2);
}

#[tokio::test]
async fn non_connection_errors_never_trigger() {
    let pool = FakePool::with_capacity(10);
    let classifier = classifier(&pool);

    for _ in 0..20 {
        classifier.classify(DbError::Query("bad".into()), "x");
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.ping_calls(), 0);
}

#[tokio::test]
async fn triggered_check_failure_is_contained() {
    let pool = FakePool::with_capacity(10);
    let classifier = classifier(&pool);

    pool.script_ping_failures(1);
    for _ in 0..5 {
        classifier.classify(DbError::Connection("refused".into()), "x");
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The failed check is recorded, not raised, and later errors still count.
    classifier.classify(DbError::Query("bad".into()), "y");
    assert_eq!(classifier.stats().total_errors, 6);
}

// -- Enrichment ------------------------------------------------------------

#[tokio::test]
async fn classified_error_carries_pool_snapshot() {
    let pool = FakePool::with_capacity(10);
    pool.set_counters(6, 4);
    let classifier = classifier(&pool);

    let classified = classifier.classify(DbError::Query("bad".into()), "list-items");
    let snapshot = classified.pool_status.unwrap();
    assert_eq!(snapshot.used, 6);
    assert_eq!(snapshot.free, 4);
    assert_eq!(classified.context, "list-items");
}
