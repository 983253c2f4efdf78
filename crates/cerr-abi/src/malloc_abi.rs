//! ABI layer for tracked allocation (`cerr_malloc`, `cerr_calloc`,
//! `cerr_realloc`, `cerr_free`).
//!
//! Allocation failure and a full fixed-capacity cache terminate the process,
//! so the allocating entry points never return null. `cerr_free` on an
//! untracked pointer is reported and ignored.

use std::ffi::{c_int, c_void};

use cerr_membrane::global;

// ---------------------------------------------------------------------------
// malloc
// ---------------------------------------------------------------------------

/// Tracked `malloc`. A zero size yields a one-byte block.
///
/// # Safety
///
/// The returned block must only be released through [`cerr_free`] or
/// resized through [`cerr_realloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cerr_malloc(size: usize) -> *mut c_void {
    global::allocate(size).as_ptr()
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

/// Tracked `calloc`: `nmemb * size` zeroed bytes.
///
/// # Safety
///
/// Same ownership rules as [`cerr_malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cerr_calloc(nmemb: usize, size: usize) -> *mut c_void {
    global::zero_allocate(nmemb, size).as_ptr()
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// Tracked `realloc`. A null `ptr` behaves like [`cerr_malloc`].
///
/// # Safety
///
/// `ptr` must be null or a live block from this allocator. After the call
/// only the returned pointer may be used.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cerr_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { global::reallocate(ptr, size).as_ptr() }
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// Tracked `free`. Null is a no-op; double frees and foreign pointers are
/// reported and not forwarded to the C heap.
///
/// # Safety
///
/// `ptr` must not be in use by the caller after this returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cerr_free(ptr: *mut c_void) {
    // SAFETY: untracked addresses are never dereferenced or freed.
    unsafe {
        global::release(ptr);
    }
}

// ---------------------------------------------------------------------------
// introspection
// ---------------------------------------------------------------------------

/// Returns 1 when `ptr` is a live tracked block, 0 otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn cerr_is_tracked(ptr: *const c_void) -> c_int {
    c_int::from(global::global_tracker().is_tracked(ptr))
}

/// Number of live tracked blocks.
#[unsafe(no_mangle)]
pub extern "C" fn cerr_tracked_count() -> usize {
    global::tracked_count()
}
