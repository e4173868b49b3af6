//! Timeout-guard races under a paused runtime clock.

use std::sync::Arc;
use std::time::Duration;

use poolguard::config::TimeoutConfig;
use poolguard::error::{DbError, DbResult};
use poolguard::health::HealthChecker;
use poolguard::monitor::PoolMonitor;
use poolguard::testkit::pool::FakePool;
use poolguard::timeout::TimeoutGuard;

fn guard(pool: &Arc<FakePool>, config: TimeoutConfig) -> TimeoutGuard {
    let monitor = Arc::new(PoolMonitor::new(pool.shared(), 0.7));
    let health = Arc::new(HealthChecker::new(pool.shared()));
    TimeoutGuard::new(monitor, health, config)
}

async fn sleep_then<T>(delay: Duration, value: T) -> DbResult<T> {
    tokio::time::sleep(delay).await;
    Ok(value)
}

// -- Query timeout race ----------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timer_wins_when_operation_is_one_ms_late() {
    let pool = FakePool::with_capacity(10);
    let guard = guard(&pool, TimeoutConfig::default());

    let started = tokio::time::Instant::now();
    let result = guard
        .with_query_timeout(
            "SELECT * FROM big_table",
            Some(Duration::from_millis(200)),
            sleep_then(Duration::from_millis(201), 1u32),
        )
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(DbError::QueryTimeout { timeout_ms: 200 })
    ));
    // The guard resolves at the deadline, not when the operation would have.
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(201));
}

#[tokio::test(start_paused = true)]
async fn operation_wins_when_one_ms_early() {
    let pool = FakePool::with_capacity(10);
    let guard = guard(&pool, TimeoutConfig::default());

    let result = guard
        .with_query_timeout(
            "SELECT 1",
            Some(Duration::from_millis(200)),
            sleep_then(Duration::from_millis(199), 7u32),
        )
        .await;

    assert_eq!(result.unwrap(), 7);
}

#[tokio::test(start_paused = true)]
async fn operation_failure_is_returned_unchanged() {
    let pool = FakePool::with_capacity(10);
    let guard = guard(&pool, TimeoutConfig::default());

    let result: DbResult<u32> = guard
        .with_query_timeout("UPDATE items", Some(Duration::from_millis(200)), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(DbError::Query("duplicate key".into()))
        })
        .await;

    match result {
        Err(DbError::Query(message)) => assert_eq!(message, "duplicate key"),
        other => panic!("expected the operation's own error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn default_query_timeout_comes_from_config() {
    let pool = FakePool::with_capacity(10);
    let guard = guard(
        &pool,
        TimeoutConfig {
            query_timeout_ms: 100,
            transaction_timeout_ms: 60_000,
        },
    );

    let result: DbResult<u32> = guard
        .with_query_timeout("SELECT 1", None, sleep_then(Duration::from_millis(150), 0))
        .await;

    assert!(matches!(
        result,
        Err(DbError::QueryTimeout { timeout_ms: 100 })
    ));
}

#[tokio::test(start_paused = true)]
async fn timeout_triggers_async_health_check() {
    let pool = FakePool::with_capacity(10);
    let guard = guard(&pool, TimeoutConfig::default());

    let _ = guard
        .with_query_timeout(
            "SELECT 1",
            Some(Duration::from_millis(50)),
            sleep_then(Duration::from_millis(100), 0u32),
        )
        .await;

    // Let the fire-and-forget check run.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.ping_calls(), 1);
}

// -- Transaction timeout ---------------------------------------------------

#[tokio::test]
async fn transaction_gets_the_configured_deadline() {
    let pool = FakePool::with_capacity(10);
    let guard = guard(
        &pool,
        TimeoutConfig {
            query_timeout_ms: 30_000,
            transaction_timeout_ms: 2_500,
        },
    );

    let result = guard
        .with_transaction_timeout(None, |deadline| async move {
            Ok(deadline.as_millis() as u64)
        })
        .await;

    assert_eq!(result.unwrap(), 2_500);
}

#[tokio::test(start_paused = true)]
async fn transaction_timeout_triggers_health_check() {
    let pool = FakePool::with_capacity(10);
    let guard = guard(&pool, TimeoutConfig::default());

    let result: DbResult<()> = guard
        .with_transaction_timeout(Some(Duration::from_millis(25)), |deadline| async move {
            Err(DbError::TransactionTimeout {
                timeout_ms: deadline.as_millis() as u64,
            })
        })
        .await;

    assert!(matches!(
        result,
        Err(DbError::TransactionTimeout { timeout_ms: 25 })
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.ping_calls(), 1);
}
