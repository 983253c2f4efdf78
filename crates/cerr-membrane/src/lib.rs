//! # cerr-membrane
//!
//! Allocation tracking layer: an open-addressing cache of live heap blocks,
//! the tracked allocator built on it, and the diagnostics sink shared with
//! the exception engine in `cerr-core`.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod global;
pub mod metrics;
pub mod tracked;

pub use cache::{AllocationCache, CacheError};
pub use config::{
    CacheConfig, ConfigError, GrowthPolicy, LogFormat, RuntimeConfig, UntrackedReallocPolicy,
    runtime_config,
};
pub use diagnostics::{
    DiagnosticRecord, DiagnosticSink, Diagnostics, FATAL_EXIT_CODE, JsonlSink, MemorySink,
    Severity, StderrSink, diagnostics, set_diagnostics,
};
pub use global::{InitError, global_tracker, init};
pub use metrics::{MetricsSnapshot, TrackerMetrics};
pub use tracked::{LibcAllocator, RawAllocator, TrackError, TrackedAllocator};
