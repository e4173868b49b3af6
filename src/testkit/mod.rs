//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`pool`]: [`FakePool`](pool::FakePool), a scriptable
//!   [`DatabasePool`](crate::pool::DatabasePool) with synthetic events,
//!   controllable ping outcomes, and call counters.
//! - [`config`]: Canonical test configurations with short intervals.

pub mod config;
pub mod pool;
