use cerr_membrane::{AllocationCache, CacheConfig, CacheError, RuntimeConfig, Severity};
use cerr_membrane::{Diagnostics, LibcAllocator, MemorySink, TrackedAllocator};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn assert_cache_matches(cache: &AllocationCache, model: &HashSet<usize>, seed: u64, step: usize) {
    assert_eq!(cache.len(), model.len(), "seed={seed} step={step}: len");
    for &addr in model {
        let idx = cache
            .find(addr)
            .unwrap_or_else(|| panic!("seed={seed} step={step}: {addr:#x} unreachable"));
        assert_eq!(cache.slot(idx), Some(addr), "seed={seed} step={step}: slot");
    }
    let live: HashSet<usize> = cache.iter().collect();
    assert_eq!(&live, model, "seed={seed} step={step}: iter");
}

#[test]
fn deterministic_cache_sequences_match_set_model() {
    // Few distinct addresses sharing low bits so clusters form, wrap and
    // get split by removals.
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 4_000;
    const ADDRS: usize = 96;

    for seed in SEEDS {
        let mut rng = XorShift64::new(seed);
        let mut cache = AllocationCache::new(CacheConfig::dynamic(4).unwrap());
        let mut model = HashSet::new();

        for step in 0..STEPS {
            let addr = 0x4000 + rng.gen_range_usize(0, ADDRS - 1) * 16;
            match rng.gen_range_usize(0, 2) {
                0 | 1 => {
                    let result = cache.track(addr);
                    if model.insert(addr) {
                        assert!(result.is_ok(), "seed={seed} step={step}: insert failed");
                    } else {
                        assert_eq!(result, Err(CacheError::AlreadyTracked { addr }));
                    }
                }
                _ => {
                    assert_eq!(
                        cache.untrack(addr),
                        model.remove(&addr),
                        "seed={seed} step={step}: untrack"
                    );
                }
            }
            assert!(cache.load_factor() <= 0.75, "seed={seed}: load factor");
            if step % 97 == 0 {
                assert_cache_matches(&cache, &model, seed, step);
            }
        }
        assert_cache_matches(&cache, &model, seed, STEPS);
    }
}

#[test]
fn deterministic_fixed_cache_sequences_never_lose_entries() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 3_000;

    for seed in SEEDS {
        let mut rng = XorShift64::new(seed);
        let mut cache = AllocationCache::new(CacheConfig::fixed(32).unwrap());
        let mut model = HashSet::new();

        for step in 0..STEPS {
            let addr = 0x9000 + rng.gen_range_usize(0, 63) * 32;
            if rng.gen_range_usize(0, 1) == 0 {
                match cache.track(addr) {
                    Ok(_) => assert!(model.insert(addr)),
                    Err(CacheError::Full { capacity, .. }) => {
                        assert_eq!(capacity, 32);
                        assert_eq!(model.len(), 32, "seed={seed} step={step}: early full");
                    }
                    Err(CacheError::AlreadyTracked { .. }) => assert!(model.contains(&addr)),
                    Err(other) => panic!("seed={seed} step={step}: {other}"),
                }
            } else {
                assert_eq!(cache.untrack(addr), model.remove(&addr));
            }
        }
        assert_cache_matches(&cache, &model, seed, STEPS);
    }
}

#[test]
fn mixed_allocation_stress_returns_to_empty() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const LIVE: usize = 500;

    for seed in SEEDS {
        let sink = Arc::new(MemorySink::new());
        let diag = Diagnostics::new(sink.clone(), Severity::Warn);
        let config = RuntimeConfig::default().with_cache(CacheConfig::dynamic(2).unwrap());
        let alloc = TrackedAllocator::with_parts(LibcAllocator, &config, diag);
        let mut rng = XorShift64::new(seed);

        let mut ptrs = Vec::with_capacity(LIVE);
        for _ in 0..LIVE {
            let ptr = match rng.gen_range_usize(0, 2) {
                0 => alloc.allocate(rng.gen_range_usize(0, 256)),
                1 => alloc.zero_allocate(rng.gen_range_usize(1, 8), rng.gen_range_usize(1, 32)),
                _ => {
                    let p = alloc.allocate(8);
                    unsafe { alloc.reallocate(p.as_ptr(), rng.gen_range_usize(16, 512)) }
                }
            };
            ptrs.push(ptr);
        }
        assert_eq!(alloc.len(), LIVE, "seed={seed}");

        // Release in a shuffled order.
        for i in (1..ptrs.len()).rev() {
            let j = rng.gen_range_usize(0, i);
            ptrs.swap(i, j);
        }
        for (i, ptr) in ptrs.iter().enumerate() {
            assert!(unsafe { alloc.release(ptr.as_ptr()) }, "seed={seed} i={i}");
        }
        assert!(alloc.is_empty(), "seed={seed}");
        assert_eq!(alloc.sweep(), 0);
        assert!(sink.records().is_empty(), "seed={seed}: unexpected warnings");
    }
}

#[test]
fn concurrent_tracking_keeps_counts_exact() {
    let sink = Arc::new(MemorySink::new());
    let diag = Diagnostics::new(sink.clone(), Severity::Warn);
    let alloc = Arc::new(TrackedAllocator::with_parts(
        LibcAllocator,
        &RuntimeConfig::default(),
        diag,
    ));

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let alloc = Arc::clone(&alloc);
            std::thread::spawn(move || {
                let mut rng = XorShift64::new(t + 11);
                for _ in 0..200 {
                    let mut held = Vec::new();
                    for _ in 0..rng.gen_range_usize(1, 16) {
                        held.push(alloc.allocate(rng.gen_range_usize(1, 128)).as_ptr() as usize);
                    }
                    for addr in held {
                        let ptr = addr as *mut std::ffi::c_void;
                        let ptr = unsafe { alloc.reallocate(ptr, 64) };
                        assert!(unsafe { alloc.release(ptr.as_ptr()) });
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(alloc.is_empty());
    assert_eq!(alloc.stats().untracked_releases, 0);
    assert!(sink.records().is_empty());
}
