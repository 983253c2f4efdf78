#![no_main]
use std::sync::Arc;

use cerr_membrane::{
    Diagnostics, LibcAllocator, MemorySink, RuntimeConfig, Severity, TrackedAllocator,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let diag = Diagnostics::new(Arc::new(MemorySink::new()), Severity::Error);
    let tracker = TrackedAllocator::with_parts(LibcAllocator, &RuntimeConfig::default(), diag);
    let mut live = Vec::new();

    for chunk in data.chunks_exact(4) {
        let op = chunk[0] % 4;
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]])).min(65536);
        let pick = usize::from(chunk[3]);

        match op {
            0 => live.push(tracker.allocate(size)),
            1 => live.push(tracker.zero_allocate(1 + pick % 8, size)),
            2 if !live.is_empty() => {
                let i = pick % live.len();
                // SAFETY: live pointers all came from this tracker.
                live[i] = unsafe { tracker.reallocate(live[i].as_ptr(), size) };
            }
            3 if !live.is_empty() => {
                let p = live.swap_remove(pick % live.len());
                // SAFETY: released once here, then again to hit the
                // double-free path.
                unsafe {
                    assert!(tracker.release(p.as_ptr()));
                    assert!(!tracker.release(p.as_ptr()));
                }
            }
            _ => {}
        }
        assert_eq!(tracker.len(), live.len());
    }

    assert_eq!(tracker.sweep(), live.len());
    assert!(tracker.is_empty());
});
