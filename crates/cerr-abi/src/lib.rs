//! # cerr-abi
//!
//! `extern "C"` boundary for C callers. Every entry point forwards to the
//! process-wide tracked allocator in `cerr-membrane`, so blocks handed out
//! here are swept and reported as leaks when the process exits.
//!
//! ```text
//! C caller -> cerr_* entry (this crate) -> TrackedAllocator -> libc heap
//! ```
//!
//! Exceptions are Rust unwinds and never cross this boundary.

pub mod malloc_abi;
pub mod startup_abi;
