//! Process handles driven by the pool runner.

pub mod command;
pub mod handle;

pub use command::{CommandHandle, CommandSpec, OUTPUT_DRAIN_GRACE};
pub use handle::{ProcessHandle, ProcessStatus};
