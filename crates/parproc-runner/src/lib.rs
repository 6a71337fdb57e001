//! parproc Runner Library
//!
//! Runs a keyed collection of external processes with bounded concurrency:
//! - Pool runner: admission, polling and reaping loop
//! - Process handles, including a `tokio::process` implementation
//! - TOML job manifests

pub mod manifest;
pub mod pool;
pub mod subprocess;

pub use manifest::{JobSpec, Manifest};
pub use pool::{PoolLimit, PoolRunner, PoolSize, RunnerError};
pub use subprocess::{CommandHandle, CommandSpec, ProcessHandle, ProcessStatus};
