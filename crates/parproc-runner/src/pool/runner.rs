//! Polling pool runner.
//!
//! [`PoolRunner`] owns a registry of keyed [`ProcessHandle`]s and drives them
//! to completion with at most [`PoolSize`] of them started at a time:
//!
//! 1. every registered key is queued (registry order) when [`PoolRunner::run`]
//!    begins; handles already started by an earlier, aborted run go straight
//!    to the running set;
//! 2. each pass reaps finished handles from the running set, calling the
//!    completion callback and dropping the handle from the registry;
//! 3. pending keys are then admitted FIFO while the pool has room;
//! 4. the runner sleeps for the poll interval and repeats until nothing is
//!    pending or running.
//!
//! Keys registered after a run starts are not picked up by that run.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{Level, debug, enabled, info, trace, warn};

use super::limit::{PoolLimit, PoolSize};
use super::status::StatusCounts;
use crate::subprocess::{ProcessHandle, ProcessStatus};

/// Delay between two polling passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Error type accepted from completion callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Bounded-concurrency runner for keyed process handles.
pub struct PoolRunner<H> {
    /// Registered handles, in registration order.
    processes: IndexMap<String, H>,
    /// Keys awaiting admission.
    pending: VecDeque<String>,
    /// Keys admitted and started, in admission order.
    running: Vec<String>,
    limit: PoolLimit,
    poll_interval: Duration,
}

impl<H: ProcessHandle> PoolRunner<H> {
    /// Create a runner with the default pool size of 5.
    pub fn new<I, K>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, H)>,
        K: Into<String>,
    {
        Self::with_pool_size(items, PoolSize::default())
    }

    /// Create a runner with an explicit pool size.
    pub fn with_pool_size<I, K>(items: I, size: impl Into<PoolSize>) -> Self
    where
        I: IntoIterator<Item = (K, H)>,
        K: Into<String>,
    {
        let mut runner = Self {
            processes: IndexMap::new(),
            pending: VecDeque::new(),
            running: Vec::new(),
            limit: PoolLimit::new(size.into()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        for (key, handle) in items {
            runner.insert(key, handle);
        }
        runner
    }

    /// Set the delay between polling passes.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Register `handle` under `key`, replacing and returning any previous
    /// handle with the same key.
    pub fn insert(&mut self, key: impl Into<String>, handle: H) -> Option<H> {
        let key = key.into();
        let replaced = self.processes.insert(key.clone(), handle);
        if replaced.is_some() {
            debug!(key = %key, "Replaced registered process");
        }
        replaced
    }

    /// Unregister `key`. Only bookkeeping: a started process keeps running.
    pub fn remove(&mut self, key: &str) -> Option<H> {
        self.pending.retain(|k| k != key);
        self.running.retain(|k| k != key);
        self.processes.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Result<&H, RunnerError> {
        self.processes.get(key).ok_or_else(|| not_found(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Result<&mut H, RunnerError> {
        self.processes.get_mut(key).ok_or_else(|| not_found(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.processes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Registered keys, in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }

    /// Registered items, in registration order.
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, H> {
        self.processes.iter()
    }

    pub fn pool_size(&self) -> PoolSize {
        self.limit.get()
    }

    /// Change the concurrency bound. During a run this applies from the next
    /// admission pass; already running handles are not stopped.
    pub fn set_pool_size(&mut self, size: impl Into<PoolSize>) {
        self.limit.set(size);
    }

    /// Shared handle to the concurrency bound, usable while a run holds
    /// `&mut self` (e.g. captured by the completion callback).
    pub fn pool_limit(&self) -> PoolLimit {
        self.limit.clone()
    }

    /// Status of every registered handle, in registration order.
    pub fn statuses(&self) -> impl Iterator<Item = (&str, ProcessStatus)> {
        self.processes
            .iter()
            .map(|(key, handle)| (key.as_str(), handle.status()))
    }

    /// Keys currently admitted and not yet reaped.
    pub fn running_keys(&self) -> impl Iterator<Item = &str> {
        self.running.iter().map(String::as_str)
    }

    /// Run every registered handle to completion.
    ///
    /// `on_finished` is called exactly once per handle, in the order handles
    /// are observed finished, before the handle is dropped from the registry.
    /// An error from the callback, or from starting or polling a handle,
    /// aborts the run immediately; handles that are still running keep
    /// running, and the runner's state should be considered indeterminate.
    pub async fn run<F, E>(&mut self, mut on_finished: F) -> Result<(), RunnerError>
    where
        F: FnMut(&mut H, &str) -> Result<(), E>,
        E: Into<BoxError>,
    {
        if !self.pending.is_empty() || !self.running.is_empty() {
            warn!(
                pending = self.pending.len(),
                running = self.running.len(),
                "Discarding schedule left over from an aborted run"
            );
            self.pending.clear();
            self.running.clear();
        }
        // Handles started by an aborted run are polled, not started again.
        for (key, handle) in &self.processes {
            if handle.status() == ProcessStatus::Ready {
                self.pending.push_back(key.clone());
            } else {
                self.running.push(key.clone());
            }
        }

        info!(
            total = self.pending.len() + self.running.len(),
            resumed = self.running.len(),
            pool_size = %self.pool_size(),
            "Starting pool run"
        );

        let mut passes: u64 = 0;
        let mut finished: usize = 0;
        while !self.pending.is_empty() || !self.running.is_empty() {
            finished += self.reap(&mut on_finished)?;
            self.admit()?;
            if enabled!(Level::TRACE) {
                let counts: StatusCounts = self.statuses().map(|(_, s)| s).collect();
                trace!(
                    pass = passes,
                    pending = self.pending.len(),
                    running = self.running.len(),
                    ready = counts.ready,
                    started = counts.started,
                    terminated = counts.terminated,
                    "Poll pass"
                );
            }
            passes += 1;
            tokio::time::sleep(self.poll_interval).await;
        }

        info!(finished, passes, "Pool run finished");
        Ok(())
    }

    /// Reap every finished handle in the running set. Returns how many were
    /// reaped.
    fn reap<F, E>(&mut self, on_finished: &mut F) -> Result<usize, RunnerError>
    where
        F: FnMut(&mut H, &str) -> Result<(), E>,
        E: Into<BoxError>,
    {
        let mut reaped = 0;
        let mut index = 0;
        while index < self.running.len() {
            let key = &self.running[index];
            let Some(handle) = self.processes.get_mut(key) else {
                warn!(key = %key, "Running key is no longer registered");
                self.running.remove(index);
                continue;
            };

            let still_running = handle.is_running().map_err(|source| RunnerError::Poll {
                key: key.clone(),
                source,
            })?;
            if still_running {
                index += 1;
                continue;
            }

            debug!(key = %key, "Process finished");
            on_finished(handle, key.as_str()).map_err(|e| RunnerError::Callback {
                key: key.clone(),
                source: e.into(),
            })?;

            let key = self.running.remove(index);
            self.processes.shift_remove(&key);
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Admit pending keys FIFO while the pool has room.
    fn admit(&mut self) -> Result<(), RunnerError> {
        while self.limit.get().admits(self.running.len()) {
            let Some(key) = self.pending.pop_front() else {
                break;
            };
            let Some(handle) = self.processes.get_mut(&key) else {
                warn!(key = %key, "Pending key is no longer registered");
                continue;
            };
            handle
                .start()
                .map_err(|source| RunnerError::Start {
                    key: key.clone(),
                    source,
                })?;
            debug!(key = %key, running = self.running.len() + 1, "Admitted process");
            self.running.push(key);
        }
        Ok(())
    }
}

impl<H> std::fmt::Debug for PoolRunner<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRunner")
            .field("keys", &self.processes.keys().collect::<Vec<_>>())
            .field("pending", &self.pending)
            .field("running", &self.running)
            .field("limit", &self.limit.get())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl<'a, H> IntoIterator for &'a PoolRunner<H> {
    type Item = (&'a String, &'a H);
    type IntoIter = indexmap::map::Iter<'a, String, H>;

    fn into_iter(self) -> Self::IntoIter {
        self.processes.iter()
    }
}

fn not_found(key: &str) -> RunnerError {
    RunnerError::NotFound {
        key: key.to_string(),
    }
}

/// Errors from pool runner operations.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Process not found: {key}")]
    NotFound { key: String },

    #[error("Failed to start process {key}: {source}")]
    Start {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to poll process {key}: {source}")]
    Poll {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Completion callback failed for {key}: {source}")]
    Callback {
        key: String,
        #[source]
        source: BoxError,
    },
}
