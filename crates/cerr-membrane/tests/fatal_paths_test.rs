//! Paths that terminate the process are exercised in a child copy of this
//! test binary, selected through `CERR_FATAL_CASE`.

use cerr_membrane::{
    CacheConfig, Diagnostics, FATAL_EXIT_CODE, LibcAllocator, RawAllocator, RuntimeConfig,
    Severity, StderrSink, TrackedAllocator, UntrackedReallocPolicy,
};
use std::ffi::c_void;
use std::process::Command;
use std::sync::Arc;

const CASE_VAR: &str = "CERR_FATAL_CASE";

struct ExhaustedAllocator;

impl RawAllocator for ExhaustedAllocator {
    fn allocate(&self, _size: usize) -> *mut c_void {
        std::ptr::null_mut()
    }

    fn zero_allocate(&self, _count: usize, _size: usize) -> *mut c_void {
        std::ptr::null_mut()
    }

    unsafe fn reallocate(&self, _ptr: *mut c_void, _size: usize) -> *mut c_void {
        std::ptr::null_mut()
    }

    unsafe fn release(&self, _ptr: *mut c_void) {}
}

fn stderr_diagnostics() -> Diagnostics {
    Diagnostics::new(Arc::new(StderrSink::with_color(false)), Severity::Info)
}

#[test]
fn fatal_child_entry() {
    let Ok(case) = std::env::var(CASE_VAR) else {
        return;
    };
    match case.as_str() {
        "cache_full" => {
            let config = RuntimeConfig::default().with_cache(CacheConfig::fixed(4).unwrap());
            let alloc = TrackedAllocator::with_parts(LibcAllocator, &config, stderr_diagnostics());
            for _ in 0..5 {
                let _ = alloc.allocate(16);
            }
        }
        "allocation_failure" => {
            let alloc = TrackedAllocator::with_parts(
                ExhaustedAllocator,
                &RuntimeConfig::default(),
                stderr_diagnostics(),
            );
            let _ = alloc.zero_allocate(2, 8);
        }
        "untracked_realloc" => {
            let config =
                RuntimeConfig::default().with_untracked_realloc(UntrackedReallocPolicy::Fatal);
            let alloc = TrackedAllocator::with_parts(LibcAllocator, &config, stderr_diagnostics());
            let mut local = [0u8; 4];
            let _ = unsafe { alloc.reallocate(local.as_mut_ptr().cast(), 8) };
        }
        "exit_sweep" => {
            // Leaked on purpose; the atexit hook reports it.
            let _ = cerr_membrane::global::allocate(32);
            let _ = cerr_membrane::global::allocate(64);
            return;
        }
        other => panic!("unknown case {other}"),
    }
    unreachable!("fatal case {case} returned");
}

fn run_child(case: &str) -> (Option<i32>, String) {
    let exe = std::env::current_exe().unwrap();
    let output = Command::new(exe)
        .args(["--exact", "fatal_child_entry", "--nocapture", "--test-threads=1"])
        .env(CASE_VAR, case)
        .env("CERR_LOG_LEVEL", "info")
        .env("CERR_LOG_FORMAT", "text")
        .output()
        .unwrap();
    (
        output.status.code(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

#[test]
fn full_fixed_cache_is_fatal() {
    let (code, stderr) = run_child("cache_full");
    assert_eq!(code, Some(FATAL_EXIT_CODE), "stderr: {stderr}");
    assert!(stderr.contains("fatal: "), "stderr: {stderr}");
    assert!(stderr.contains("cache full (4 slots)"), "stderr: {stderr}");
    assert!(stderr.contains("exiting safely..."), "stderr: {stderr}");
    assert!(stderr.contains("fatal_paths_test.rs"), "stderr: {stderr}");
}

#[test]
fn allocation_failure_is_fatal() {
    let (code, stderr) = run_child("allocation_failure");
    assert_eq!(code, Some(FATAL_EXIT_CODE), "stderr: {stderr}");
    assert!(
        stderr.contains("allocation of 16 bytes failed"),
        "stderr: {stderr}"
    );
}

#[test]
fn untracked_reallocate_under_fatal_policy_terminates() {
    let (code, stderr) = run_child("untracked_realloc");
    assert_eq!(code, Some(FATAL_EXIT_CODE), "stderr: {stderr}");
    assert!(
        stderr.contains("reallocate on untracked pointer"),
        "stderr: {stderr}"
    );
}

#[test]
fn process_exit_sweeps_global_leaks() {
    let (code, stderr) = run_child("exit_sweep");
    assert_eq!(code, Some(0), "stderr: {stderr}");
    assert!(
        stderr.contains("tracked possible memory leak of 2 allocations"),
        "stderr: {stderr}"
    );
}
