//! Concurrency bound for the pool runner.
//!
//! [`PoolSize`] is the value type; [`PoolLimit`] is a cloneable cell holding
//! the current bound so it can be adjusted while a run is in progress (e.g.
//! from inside a completion callback). The runner re-reads it on every
//! admission pass.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default maximum number of concurrently running processes.
pub const DEFAULT_POOL_SIZE: PoolSize = PoolSize::from_raw(5);

/// Maximum number of handles kept started at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolSize {
    /// At most this many handles run concurrently.
    Bounded(NonZeroUsize),
    /// Every pending handle is admitted immediately.
    Unbounded,
}

impl PoolSize {
    /// Whether another handle may be admitted while `running` are active.
    pub const fn admits(self, running: usize) -> bool {
        match self {
            Self::Bounded(limit) => running < limit.get(),
            Self::Unbounded => true,
        }
    }

    /// The numeric bound, or `None` when unbounded.
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Bounded(limit) => Some(limit.get()),
            Self::Unbounded => None,
        }
    }

    const fn to_raw(self) -> usize {
        match self {
            Self::Bounded(limit) => limit.get(),
            Self::Unbounded => 0,
        }
    }

    const fn from_raw(raw: usize) -> Self {
        match NonZeroUsize::new(raw) {
            Some(limit) => Self::Bounded(limit),
            None => Self::Unbounded,
        }
    }
}

impl Default for PoolSize {
    fn default() -> Self {
        DEFAULT_POOL_SIZE
    }
}

/// `0` means unbounded.
impl From<usize> for PoolSize {
    fn from(n: usize) -> Self {
        Self::from_raw(n)
    }
}

/// Values below 1 mean unbounded.
impl From<i64> for PoolSize {
    fn from(n: i64) -> Self {
        usize::try_from(n).map_or(Self::Unbounded, Self::from_raw)
    }
}

impl fmt::Display for PoolSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(limit) => write!(f, "{limit}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Shared, adjustable pool bound.
///
/// Clones observe and modify the same value.
#[derive(Debug, Clone)]
pub struct PoolLimit {
    raw: Arc<AtomicUsize>,
}

impl PoolLimit {
    /// Create a cell holding `size`.
    pub fn new(size: PoolSize) -> Self {
        Self {
            raw: Arc::new(AtomicUsize::new(size.to_raw())),
        }
    }

    /// Current bound.
    pub fn get(&self) -> PoolSize {
        PoolSize::from_raw(self.raw.load(Ordering::Acquire))
    }

    /// Replace the bound. Takes effect on the next admission pass.
    pub fn set(&self, size: impl Into<PoolSize>) {
        self.raw.store(size.into().to_raw(), Ordering::Release);
    }
}

impl Default for PoolLimit {
    fn default() -> Self {
        Self::new(PoolSize::default())
    }
}
