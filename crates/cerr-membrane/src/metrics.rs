//! Atomic counters for tracked-allocator observability.
//!
//! All counters use relaxed ordering; they are advisory, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Tracked allocator operation counters.
#[derive(Debug)]
pub struct TrackerMetrics {
    /// Successful `allocate` calls.
    pub allocations: AtomicU64,
    /// Successful `zero_allocate` calls.
    pub zero_allocations: AtomicU64,
    /// Successful `reallocate` calls.
    pub reallocations: AtomicU64,
    /// Blocks handed back to the underlying allocator by `release`.
    pub releases: AtomicU64,
    /// Releases of addresses the cache did not hold (double or foreign free).
    pub untracked_releases: AtomicU64,
    /// Reallocations of addresses the cache did not hold.
    pub untracked_reallocations: AtomicU64,
    /// Cache doublings.
    pub cache_grows: AtomicU64,
    /// Blocks released by a leak sweep.
    pub leaks_swept: AtomicU64,
}

impl TrackerMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            zero_allocations: AtomicU64::new(0),
            reallocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            untracked_releases: AtomicU64::new(0),
            untracked_reallocations: AtomicU64::new(0),
            cache_grows: AtomicU64::new(0),
            leaks_swept: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            zero_allocations: Self::get(&self.zero_allocations),
            reallocations: Self::get(&self.reallocations),
            releases: Self::get(&self.releases),
            untracked_releases: Self::get(&self.untracked_releases),
            untracked_reallocations: Self::get(&self.untracked_reallocations),
            cache_grows: Self::get(&self.cache_grows),
            leaks_swept: Self::get(&self.leaks_swept),
        }
    }
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub zero_allocations: u64,
    pub reallocations: u64,
    pub releases: u64,
    pub untracked_releases: u64,
    pub untracked_reallocations: u64,
    pub cache_grows: u64,
    pub leaks_swept: u64,
}
