//! Process-wide tracked allocator.
//!
//! The instance is created on first use (or by [`init`]) from the
//! process-wide [`RuntimeConfig`]. Creating it registers an `atexit` hook
//! that sweeps whatever is still tracked when the process exits.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Once, OnceLock};

use thiserror::Error;

use crate::config::{RuntimeConfig, install_config, runtime_config};
use crate::diagnostics::diagnostics;
use crate::tracked::TrackedAllocator;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("runtime already initialized, configuration must be installed before first use")]
    AlreadyInitialized,
}

static GLOBAL_TRACKER: OnceLock<TrackedAllocator> = OnceLock::new();
static SWEEP_HOOK: Once = Once::new();

extern "C" fn sweep_at_exit() {
    if let Some(tracker) = GLOBAL_TRACKER.get() {
        tracker.sweep();
    }
}

fn register_sweep_hook() {
    SWEEP_HOOK.call_once(|| {
        // SAFETY: `sweep_at_exit` captures nothing and only touches the
        // static tracker, which outlives every exit handler.
        let rc = unsafe { libc::atexit(sweep_at_exit) };
        if rc != 0 {
            diagnostics().warn(
                "atexit_failed",
                "could not register the shutdown leak sweep",
            );
        }
    });
}

/// Access the process-wide tracked allocator.
#[must_use]
pub fn global_tracker() -> &'static TrackedAllocator {
    let tracker = GLOBAL_TRACKER.get_or_init(|| TrackedAllocator::new(runtime_config()));
    register_sweep_hook();
    tracker
}

/// Install `config` and build the process-wide tracked allocator.
///
/// Must run before anything reads the process-wide configuration.
pub fn init(config: RuntimeConfig) -> Result<&'static TrackedAllocator, InitError> {
    install_config(config).map_err(|_| InitError::AlreadyInitialized)?;
    Ok(global_tracker())
}

/// Allocate through the process-wide tracker; fatal on failure.
#[track_caller]
pub fn allocate(size: usize) -> NonNull<c_void> {
    global_tracker().allocate(size)
}

/// Zero-allocate through the process-wide tracker; fatal on failure.
#[track_caller]
pub fn zero_allocate(count: usize, size: usize) -> NonNull<c_void> {
    global_tracker().zero_allocate(count, size)
}

/// Reallocate through the process-wide tracker; fatal on failure.
///
/// # Safety
///
/// `ptr` must be null or a block returned by the process-wide tracker that
/// has not been released.
#[track_caller]
pub unsafe fn reallocate(ptr: *mut c_void, size: usize) -> NonNull<c_void> {
    // SAFETY: forwarded caller contract.
    unsafe { global_tracker().reallocate(ptr, size) }
}

/// Release through the process-wide tracker.
///
/// # Safety
///
/// `ptr` must be null, an address the tracker never handed out, or a block
/// returned by the process-wide tracker.
pub unsafe fn release(ptr: *mut c_void) -> bool {
    // SAFETY: forwarded caller contract.
    unsafe { global_tracker().release(ptr) }
}

/// Sweep the process-wide tracker now instead of at exit.
pub fn sweep() -> usize {
    global_tracker().sweep()
}

/// Number of blocks the process-wide tracker currently holds.
#[must_use]
pub fn tracked_count() -> usize {
    global_tracker().len()
}
