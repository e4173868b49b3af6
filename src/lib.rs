//! Poolguard - Connection-pool health and resilience toolkit.
//!
//! This crate observes, protects, and self-heals a shared database
//! connection pool: cumulative event accounting, periodic liveness checks,
//! heuristic leak detection with automatic idle-connection draining, query
//! and transaction deadlines, error classification, and coordinated
//! graceful shutdown.
//!
//! # Architecture
//!
//! The persistence layer stays opaque behind the
//! [`DatabasePool`](pool::DatabasePool) trait; the request-handling layer
//! reaches in only through [`TimeoutGuard`](timeout::TimeoutGuard) wrappers
//! and the classifier's unhandled-error hook. Everything is owned by an
//! explicitly constructed [`PoolGuard`](supervisor::PoolGuard), so there is no global
//! state, so tests run isolated instances freely.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML files with tunable heuristics
//! - [`error`] - Error taxonomy and classification kinds
//! - [`pool`] - The `DatabasePool` seam: snapshots, events, subscriptions
//! - [`monitor`] - Snapshot reads and cumulative pool-event metrics
//! - [`health`] - Periodic liveness checks and rolling health state
//! - [`leak`] - Leak heuristic, history, and automatic draining
//! - [`classify`] - Error accounting and caller-facing response shaping
//! - [`timeout`] - Query/transaction deadline guards
//! - [`task`] - Cancellable periodic task primitive
//! - [`supervisor`] - The owning service object and shutdown coordination
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use poolguard::config::Config;
//! use poolguard::supervisor::PoolGuard;
//! # use poolguard::pool::DatabasePool;
//! # fn open_pool() -> Arc<dyn DatabasePool> { unimplemented!() }
//!
//! # async fn run() -> poolguard::error::Result<()> {
//! let guard = PoolGuard::new(Config::default());
//! guard.initialize(open_pool())?;
//!
//! // ... serve requests through guard.timeouts() ...
//!
//! guard.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod health;
pub mod leak;
pub mod monitor;
pub mod pool;
pub mod supervisor;
pub mod task;
pub mod timeout;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
