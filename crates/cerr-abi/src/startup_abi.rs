//! Lifecycle entry points: explicit initialization and an early leak sweep.
//!
//! Both are optional. Without `cerr_init` the allocator is configured from
//! the environment on first use, and the leak sweep always runs at exit.

use std::ffi::c_int;

use cerr_membrane::{CacheConfig, GrowthPolicy, RuntimeConfig, diagnostics, global};

pub const CERR_OK: c_int = 0;
pub const CERR_EINVAL: c_int = -1;
pub const CERR_EALREADY: c_int = -2;

/// Initialize the tracked allocator.
///
/// `capacity == 0` keeps the cache shape from the environment; otherwise it
/// must be a power of two, and a nonzero `fixed` makes a full cache fatal
/// instead of growing it. Returns [`CERR_OK`], [`CERR_EINVAL`] for a bad
/// capacity, or [`CERR_EALREADY`] once the allocator is in use.
///
/// An unparsable environment falls back to defaults and is reported as a
/// `config_invalid` warning once initialization succeeds.
#[unsafe(no_mangle)]
pub extern "C" fn cerr_init(capacity: usize, fixed: c_int) -> c_int {
    let (mut config, env_error) = match RuntimeConfig::from_env() {
        Ok(config) => (config, None),
        Err(err) => (RuntimeConfig::default(), Some(err)),
    };
    if capacity != 0 {
        let growth = if fixed != 0 {
            GrowthPolicy::Fixed
        } else {
            GrowthPolicy::Dynamic
        };
        match CacheConfig::new(capacity, growth) {
            Ok(cache) => config = config.with_cache(cache),
            Err(_) => return CERR_EINVAL,
        }
    }
    // Diagnostics are only touched after `init`: building them first would
    // load the environment config and make the install fail.
    let tracker = match global::init(config) {
        Ok(tracker) => tracker,
        Err(_) => return CERR_EALREADY,
    };
    let diag = diagnostics();
    if let Some(err) = env_error {
        diag.config_invalid(&err);
    }
    diag.done(
        "init",
        format!("tracked allocator ready ({} slots)", tracker.capacity()),
    );
    CERR_OK
}

/// Release every block still tracked, reporting them as possible leaks.
/// Returns how many were released.
///
/// # Safety
///
/// Every tracked block is freed: no caller may use any of them afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cerr_sweep() -> usize {
    global::sweep()
}
