#![no_main]
use std::collections::HashSet;

use cerr_membrane::{AllocationCache, CacheConfig, CacheError};
use libfuzzer_sys::fuzz_target;

// Each 4-byte chunk is one op: [kind, addr lo, addr hi, cluster].
// Addresses are packed into a narrow range so probe chains collide.
fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }
    let fixed = data[0] & 1 == 1;
    let capacity = 1usize << (data[0] >> 1 & 0x7);
    let config = if fixed {
        CacheConfig::fixed(capacity)
    } else {
        CacheConfig::dynamic(capacity)
    };
    let Ok(config) = config else { return };

    let mut cache = AllocationCache::new(config);
    let mut model = HashSet::new();

    for chunk in data[1..].chunks_exact(4) {
        let addr = (usize::from(u16::from_le_bytes([chunk[1], chunk[2]])) << 4)
            | usize::from(chunk[3] & 0xf)
            | 1;
        match chunk[0] % 3 {
            0 => {
                if model.contains(&addr) {
                    continue;
                }
                match cache.track(addr) {
                    Ok(slot) => {
                        assert_eq!(cache.slot(slot), Some(addr));
                        model.insert(addr);
                    }
                    Err(CacheError::Full { .. }) => assert!(fixed),
                    Err(err) => panic!("unexpected cache error: {err}"),
                }
            }
            1 => assert_eq!(cache.untrack(addr), model.remove(&addr)),
            _ => assert_eq!(cache.contains(addr), model.contains(&addr)),
        }
        assert_eq!(cache.len(), model.len());
    }

    for &addr in &model {
        assert!(cache.contains(addr), "lost {addr:#x}");
    }
});
