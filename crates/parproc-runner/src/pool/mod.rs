//! Bounded-concurrency pool runner.
//!
//! - [`PoolRunner`]: registry of keyed handles plus the polling admission loop.
//! - [`PoolSize`] / [`PoolLimit`]: the concurrency bound and its shared,
//!   adjustable cell.
//! - [`StatusCounts`]: per-pass status snapshot used for tracing.

pub mod limit;
pub mod runner;
pub mod status;

pub use limit::{DEFAULT_POOL_SIZE, PoolLimit, PoolSize};
pub use runner::{BoxError, DEFAULT_POLL_INTERVAL, PoolRunner, RunnerError};
pub use status::StatusCounts;
