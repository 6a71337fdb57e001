//! Per-pass status snapshot of the registry.

use crate::subprocess::ProcessStatus;

/// Number of registered handles in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub ready: usize,
    pub started: usize,
    pub terminated: usize,
}

impl StatusCounts {
    pub const fn total(&self) -> usize {
        self.ready + self.started + self.terminated
    }
}

impl FromIterator<ProcessStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = ProcessStatus>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut counts, status| {
            match status {
                ProcessStatus::Ready => counts.ready += 1,
                ProcessStatus::Started => counts.started += 1,
                ProcessStatus::Terminated => counts.terminated += 1,
            }
            counts
        })
    }
}
