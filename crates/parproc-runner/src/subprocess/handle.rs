//! The capability the pool runner needs from a unit of work.

use std::fmt;
use std::io;

/// Lifecycle state reported by a [`ProcessHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    /// Not started yet.
    Ready,
    /// Started and still running.
    Started,
    /// Finished.
    Terminated,
}

impl ProcessStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Started => "started",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An externally-owned process the runner can start and poll.
///
/// Implementations own the real process lifecycle; the runner only calls
/// [`start`](Self::start) once per admission and then polls
/// [`is_running`](Self::is_running) until it returns `false`. Neither call
/// may block.
pub trait ProcessHandle {
    /// Begin executing the underlying work.
    fn start(&mut self) -> io::Result<()>;

    /// Non-blocking liveness check.
    fn is_running(&mut self) -> io::Result<bool>;

    /// Status snapshot, used for observability only.
    fn status(&self) -> ProcessStatus;
}

impl<H: ProcessHandle + ?Sized> ProcessHandle for Box<H> {
    fn start(&mut self) -> io::Result<()> {
        (**self).start()
    }

    fn is_running(&mut self) -> io::Result<bool> {
        (**self).is_running()
    }

    fn status(&self) -> ProcessStatus {
        (**self).status()
    }
}
