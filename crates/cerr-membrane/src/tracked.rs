//! Tracked allocator.
//!
//! Wraps a raw allocator so that every live block is recorded in an
//! [`AllocationCache`]. Releasing an address the cache does not hold is
//! reported and skipped, which turns double frees and foreign frees into
//! warnings instead of heap corruption. Whatever is still tracked when the
//! allocator is swept is released and reported as a possible leak.

use std::ffi::c_void;
use std::ptr::NonNull;

use parking_lot::Mutex;
use thiserror::Error;

use crate::cache::{AllocationCache, CacheError};
use crate::config::{RuntimeConfig, UntrackedReallocPolicy};
use crate::diagnostics::{Diagnostics, diagnostics};
use crate::metrics::{MetricsSnapshot, TrackerMetrics};

/// Tracked allocator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("allocation of {size} bytes failed")]
    AllocationFailure { size: usize },
    #[error("reallocate on untracked pointer {addr:#x}")]
    UntrackedReallocate { addr: usize },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl TrackError {
    /// Event name used when this error is reported.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::AllocationFailure { .. }
            | Self::Cache(CacheError::CapacityOverflow { .. } | CacheError::GrowthFailed { .. }) => {
                "allocation_failure"
            }
            Self::UntrackedReallocate { .. } => "untracked_reallocate",
            Self::Cache(CacheError::Full { .. }) => "cache_full",
            Self::Cache(CacheError::AlreadyTracked { .. } | CacheError::NullAddress) => {
                "assertion_failure"
            }
        }
    }
}

/// The allocator underneath the tracking layer.
pub trait RawAllocator: Send + Sync {
    fn allocate(&self, size: usize) -> *mut c_void;

    fn zero_allocate(&self, count: usize, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// `ptr` must be null or a live block obtained from this allocator.
    unsafe fn reallocate(&self, ptr: *mut c_void, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// `ptr` must be null or a live block obtained from this allocator.
    unsafe fn release(&self, ptr: *mut c_void);
}

/// The C library heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcAllocator;

impl RawAllocator for LibcAllocator {
    fn allocate(&self, size: usize) -> *mut c_void {
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(size) }
    }

    fn zero_allocate(&self, count: usize, size: usize) -> *mut c_void {
        // SAFETY: calloc has no preconditions and checks count * size itself.
        unsafe { libc::calloc(count, size) }
    }

    unsafe fn reallocate(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        // SAFETY: forwarded caller contract.
        unsafe { libc::realloc(ptr, size) }
    }

    unsafe fn release(&self, ptr: *mut c_void) {
        // SAFETY: forwarded caller contract.
        unsafe { libc::free(ptr) }
    }
}

/// Allocator that records every live block.
pub struct TrackedAllocator<A: RawAllocator = LibcAllocator> {
    raw: A,
    cache: Mutex<AllocationCache>,
    tracking: bool,
    untracked_realloc: UntrackedReallocPolicy,
    diagnostics: Diagnostics,
    metrics: TrackerMetrics,
}

impl<A: RawAllocator> std::fmt::Debug for TrackedAllocator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedAllocator")
            .field("cache", &*self.cache.lock())
            .field("tracking", &self.tracking)
            .field("untracked_realloc", &self.untracked_realloc)
            .finish_non_exhaustive()
    }
}

impl TrackedAllocator<LibcAllocator> {
    /// Tracked allocator over the C heap reporting to the process-wide
    /// diagnostics.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_parts(LibcAllocator, config, diagnostics())
    }
}

impl<A: RawAllocator> TrackedAllocator<A> {
    #[must_use]
    pub fn with_parts(raw: A, config: &RuntimeConfig, diagnostics: Diagnostics) -> Self {
        Self {
            raw,
            cache: Mutex::new(AllocationCache::new(config.cache)),
            tracking: config.tracking,
            untracked_realloc: config.untracked_realloc,
            diagnostics,
            metrics: TrackerMetrics::new(),
        }
    }

    /// Whether calls are tracked or forwarded untouched.
    #[must_use]
    pub fn tracking(&self) -> bool {
        self.tracking
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    #[must_use]
    pub fn raw(&self) -> &A {
        &self.raw
    }

    /// Number of tracked blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.lock().capacity()
    }

    #[must_use]
    pub fn is_tracked(&self, ptr: *const c_void) -> bool {
        self.cache.lock().contains(ptr as usize)
    }

    /// Cache slot holding `ptr`.
    #[must_use]
    pub fn find(&self, ptr: *const c_void) -> Option<usize> {
        self.cache.lock().find(ptr as usize)
    }

    /// Address stored in cache slot `index`.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<usize> {
        self.cache.lock().slot(index)
    }

    #[must_use]
    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn insert(&self, cache: &mut AllocationCache, ptr: NonNull<c_void>) -> Result<(), TrackError> {
        let grows = cache.grows();
        cache.track(ptr.as_ptr() as usize)?;
        if cache.grows() != grows {
            TrackerMetrics::add(&self.metrics.cache_grows, cache.grows() - grows);
            self.diagnostics.debug_with("cache_grow", || {
                format!("cache grew to {} slots", cache.capacity())
            });
        }
        Ok(())
    }

    // Track a block that was just obtained from `raw`, handing it back on
    // failure so the error path does not leak.
    fn adopt(&self, cache: &mut AllocationCache, ptr: NonNull<c_void>) -> Result<(), TrackError> {
        if let Err(err) = self.insert(cache, ptr) {
            // SAFETY: `ptr` came from `raw` and was never handed out.
            unsafe { self.raw.release(ptr.as_ptr()) };
            return Err(err);
        }
        Ok(())
    }

    #[track_caller]
    fn fail(&self, err: TrackError) -> ! {
        self.diagnostics
            .fatal(err.event(), format!("{err}, exiting safely..."))
    }

    /// Allocates `size` bytes (at least one) and tracks the block.
    pub fn try_allocate(&self, size: usize) -> Result<NonNull<c_void>, TrackError> {
        let size = size.max(1);
        let ptr = NonNull::new(self.raw.allocate(size))
            .ok_or(TrackError::AllocationFailure { size })?;
        if self.tracking {
            self.adopt(&mut self.cache.lock(), ptr)?;
        }
        TrackerMetrics::inc(&self.metrics.allocations);
        self.diagnostics
            .debug_with("alloc", || format!("tracked {ptr:p} ({size} bytes)"));
        Ok(ptr)
    }

    /// Allocates a zeroed array of `count` elements of `size` bytes and
    /// tracks the block. An empty request yields a one-byte block.
    pub fn try_zero_allocate(
        &self,
        count: usize,
        size: usize,
    ) -> Result<NonNull<c_void>, TrackError> {
        let (count, size) = if count == 0 || size == 0 {
            (1, 1)
        } else {
            (count, size)
        };
        let ptr = NonNull::new(self.raw.zero_allocate(count, size)).ok_or(
            TrackError::AllocationFailure {
                size: count.saturating_mul(size),
            },
        )?;
        if self.tracking {
            self.adopt(&mut self.cache.lock(), ptr)?;
        }
        TrackerMetrics::inc(&self.metrics.zero_allocations);
        self.diagnostics.debug_with("zero_alloc", || {
            format!("tracked {ptr:p} ({count} x {size} bytes)")
        });
        Ok(ptr)
    }

    /// Resizes a tracked block.
    ///
    /// A null `ptr` behaves like [`TrackedAllocator::try_allocate`]. An
    /// address the cache does not hold is handled by the configured
    /// [`UntrackedReallocPolicy`]; it is never passed to the raw allocator.
    /// Under [`UntrackedReallocPolicy::Warn`] the caller gets an uninitialized
    /// block and the old contents are lost.
    /// On failure the original block stays valid and tracked.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a block returned by this allocator that has not
    /// been released.
    pub unsafe fn try_reallocate(
        &self,
        ptr: *mut c_void,
        size: usize,
    ) -> Result<NonNull<c_void>, TrackError> {
        let size = size.max(1);
        let Some(old) = NonNull::new(ptr) else {
            return self.try_allocate(size);
        };

        if !self.tracking {
            // SAFETY: forwarded caller contract.
            let new = unsafe { self.raw.reallocate(old.as_ptr(), size) };
            let new = NonNull::new(new).ok_or(TrackError::AllocationFailure { size })?;
            TrackerMetrics::inc(&self.metrics.reallocations);
            return Ok(new);
        }

        // The lock spans the raw call so a block freed by the move cannot be
        // handed to another thread and tracked before the old entry is gone.
        let mut cache = self.cache.lock();
        let old_addr = old.as_ptr() as usize;
        if !cache.contains(old_addr) {
            TrackerMetrics::inc(&self.metrics.untracked_reallocations);
            match self.untracked_realloc {
                UntrackedReallocPolicy::Fatal => {
                    return Err(TrackError::UntrackedReallocate { addr: old_addr });
                }
                UntrackedReallocPolicy::Warn => {
                    self.diagnostics.warn(
                        "untracked_reallocate",
                        format!(
                            "reallocate on untracked pointer {old:p}, allocating a fresh \
                             {size} byte block; contents are not copied"
                        ),
                    );
                    let fresh = NonNull::new(self.raw.allocate(size))
                        .ok_or(TrackError::AllocationFailure { size })?;
                    self.adopt(&mut cache, fresh)?;
                    TrackerMetrics::inc(&self.metrics.allocations);
                    return Ok(fresh);
                }
            }
        }

        // SAFETY: the cache holds `old`, so it is a live block from `raw`.
        let new = unsafe { self.raw.reallocate(old.as_ptr(), size) };
        let new = NonNull::new(new).ok_or(TrackError::AllocationFailure { size })?;
        cache.untrack(old_addr);
        // Removing the old entry made room, so this only fails on a broken
        // invariant.
        self.insert(&mut cache, new)?;
        drop(cache);

        TrackerMetrics::inc(&self.metrics.reallocations);
        self.diagnostics.debug_with("realloc", || {
            format!("retracked {old:p} as {new:p} ({size} bytes)")
        });
        Ok(new)
    }

    /// Releases a tracked block.
    ///
    /// Null is a no-op. An address the cache does not hold is reported and
    /// NOT passed to the raw allocator. Returns whether a block was freed.
    ///
    /// # Safety
    ///
    /// `ptr` must be null, an untracked address, or a block returned by this
    /// allocator.
    pub unsafe fn release(&self, ptr: *mut c_void) -> bool {
        if ptr.is_null() {
            return false;
        }
        if !self.tracking {
            // SAFETY: forwarded caller contract.
            unsafe { self.raw.release(ptr) };
            TrackerMetrics::inc(&self.metrics.releases);
            return true;
        }

        if !self.cache.lock().untrack(ptr as usize) {
            TrackerMetrics::inc(&self.metrics.untracked_releases);
            self.diagnostics.warn(
                "untracked_release",
                format!("ignoring free on untracked pointer {ptr:p}"),
            );
            return false;
        }
        // SAFETY: the cache held `ptr`, so it is a live block from `raw`.
        unsafe { self.raw.release(ptr) };
        TrackerMetrics::inc(&self.metrics.releases);
        self.diagnostics
            .debug_with("free", || format!("released {ptr:p}"));
        true
    }

    /// [`TrackedAllocator::try_allocate`], terminating the process on failure.
    #[track_caller]
    pub fn allocate(&self, size: usize) -> NonNull<c_void> {
        match self.try_allocate(size) {
            Ok(ptr) => ptr,
            Err(err) => self.fail(err),
        }
    }

    /// [`TrackedAllocator::try_zero_allocate`], terminating the process on
    /// failure.
    #[track_caller]
    pub fn zero_allocate(&self, count: usize, size: usize) -> NonNull<c_void> {
        match self.try_zero_allocate(count, size) {
            Ok(ptr) => ptr,
            Err(err) => self.fail(err),
        }
    }

    /// [`TrackedAllocator::try_reallocate`], terminating the process on
    /// failure.
    ///
    /// # Safety
    ///
    /// Same contract as [`TrackedAllocator::try_reallocate`].
    #[track_caller]
    pub unsafe fn reallocate(&self, ptr: *mut c_void, size: usize) -> NonNull<c_void> {
        // SAFETY: forwarded caller contract.
        match unsafe { self.try_reallocate(ptr, size) } {
            Ok(ptr) => ptr,
            Err(err) => self.fail(err),
        }
    }

    /// Releases every block still tracked and reports them as possible
    /// leaks. Returns the number of blocks released.
    pub fn sweep(&self) -> usize {
        let mut cache = self.cache.lock();
        // SAFETY: every cached address is a live block from `raw`.
        let leaked = cache.clear(|addr| unsafe { self.raw.release(addr as *mut c_void) });
        drop(cache);

        if leaked > 0 {
            TrackerMetrics::add(&self.metrics.leaks_swept, leaked as u64);
            self.diagnostics.warn(
                "leak_sweep",
                format!("tracked possible memory leak of {leaked} allocations"),
            );
        }
        leaked
    }
}

impl<A: RawAllocator> Drop for TrackedAllocator<A> {
    fn drop(&mut self) {
        self.sweep();
    }
}
