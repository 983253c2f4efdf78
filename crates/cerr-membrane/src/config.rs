//! Runtime configuration.
//!
//! Every knob can be set programmatically or through the environment:
//! - `CERR_CACHE_CAPACITY`: initial (or fixed) slot count, a power of two.
//! - `CERR_CACHE_GROWTH`: `dynamic` (default) doubles the table under load,
//!   `fixed` treats a full table as fatal.
//! - `CERR_MSG_CAPACITY`: byte budget for a thrown exception's reason.
//! - `CERR_LOG_LEVEL`: lowest severity the diagnostics sink emits.
//! - `CERR_LOG_FORMAT`: `text` (stderr) or `jsonl`.
//! - `CERR_TRACKING`: `off` turns the tracked allocator into a passthrough.
//! - `CERR_UNTRACKED_REALLOC`: `warn` or `fatal`.

use std::sync::OnceLock;

use thiserror::Error;

use crate::diagnostics::Severity;

/// Initial slot count of the allocation cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;
/// Reason buffer size of an exception context, in bytes.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 1024;

pub const ENV_CACHE_CAPACITY: &str = "CERR_CACHE_CAPACITY";
pub const ENV_CACHE_GROWTH: &str = "CERR_CACHE_GROWTH";
pub const ENV_MSG_CAPACITY: &str = "CERR_MSG_CAPACITY";
pub const ENV_LOG_LEVEL: &str = "CERR_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "CERR_LOG_FORMAT";
pub const ENV_TRACKING: &str = "CERR_TRACKING";
pub const ENV_UNTRACKED_REALLOC: &str = "CERR_UNTRACKED_REALLOC";

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cache capacity {capacity} is not a power of two")]
    NotPowerOfTwo { capacity: usize },
    #[error("exception message capacity must be nonzero")]
    ZeroMessageCapacity,
    #[error("{var}={value:?} is not a valid number")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var}={value:?} is not a recognized value")]
    UnknownValue { var: &'static str, value: String },
}

/// What the cache does when an insert finds no room.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrowthPolicy {
    /// Double the capacity and rehash.
    #[default]
    Dynamic,
    /// Refuse the insert; the tracked allocator treats this as fatal.
    Fixed,
}

impl GrowthPolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dynamic" | "grow" | "growable" => Some(Self::Dynamic),
            "fixed" | "bounded" | "static" => Some(Self::Fixed),
            _ => None,
        }
    }
}

/// How a reallocation of an address the cache never saw is handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UntrackedReallocPolicy {
    /// Log a warning and hand out a fresh tracked block. The untracked
    /// address is left alone and its contents are NOT copied: the caller
    /// continues with uninitialized memory. Choose [`Self::Fatal`] when that
    /// data loss is unacceptable.
    #[default]
    Warn,
    /// Treat it as a broken invariant and terminate.
    Fatal,
}

impl UntrackedReallocPolicy {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" | "warning" | "proceed" => Some(Self::Warn),
            "fatal" | "abort" | "assert" => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// Output format of the default diagnostics sink.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFormat {
    /// Human-readable lines on stderr.
    #[default]
    Text,
    /// One JSON object per line on stderr.
    Jsonl,
}

impl LogFormat {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" | "human" => Some(Self::Text),
            "jsonl" | "json" => Some(Self::Jsonl),
            _ => None,
        }
    }
}

/// Shape of the allocation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    capacity: usize,
    growth: GrowthPolicy,
}

impl CacheConfig {
    /// Validate and build a cache shape.
    pub fn new(capacity: usize, growth: GrowthPolicy) -> Result<Self, ConfigError> {
        if !capacity.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo { capacity });
        }
        Ok(Self { capacity, growth })
    }

    pub fn dynamic(capacity: usize) -> Result<Self, ConfigError> {
        Self::new(capacity, GrowthPolicy::Dynamic)
    }

    pub fn fixed(capacity: usize) -> Result<Self, ConfigError> {
        Self::new(capacity, GrowthPolicy::Fixed)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn growth(&self) -> GrowthPolicy {
        self.growth
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            growth: GrowthPolicy::Dynamic,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Allocation cache shape.
    pub cache: CacheConfig,
    /// Maximum length of a formatted exception reason, in bytes.
    pub message_capacity: usize,
    /// Lowest severity emitted by the diagnostics sink. Fatal records are
    /// always emitted.
    pub threshold: Severity,
    /// Output format of the default sink.
    pub log_format: LogFormat,
    /// When false the tracked allocator forwards every call untouched.
    pub tracking: bool,
    /// Policy for reallocating an address the cache does not hold.
    pub untracked_realloc: UntrackedReallocPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            threshold: Severity::Info,
            log_format: LogFormat::Text,
            tracking: true,
            untracked_realloc: UntrackedReallocPolicy::Warn,
        }
    }
}

impl RuntimeConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Missing keys keep
    /// their defaults.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let capacity = match lookup(ENV_CACHE_CAPACITY) {
            Some(raw) => parse_usize(ENV_CACHE_CAPACITY, &raw)?,
            None => DEFAULT_CACHE_CAPACITY,
        };
        let growth = match lookup(ENV_CACHE_GROWTH) {
            Some(raw) => GrowthPolicy::from_str_loose(&raw)
                .ok_or_else(|| unknown(ENV_CACHE_GROWTH, raw))?,
            None => GrowthPolicy::default(),
        };
        config.cache = CacheConfig::new(capacity, growth)?;

        if let Some(raw) = lookup(ENV_MSG_CAPACITY) {
            let capacity = parse_usize(ENV_MSG_CAPACITY, &raw)?;
            if capacity == 0 {
                return Err(ConfigError::ZeroMessageCapacity);
            }
            config.message_capacity = capacity;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            config.threshold =
                Severity::from_str_loose(&raw).ok_or_else(|| unknown(ENV_LOG_LEVEL, raw))?;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log_format =
                LogFormat::from_str_loose(&raw).ok_or_else(|| unknown(ENV_LOG_FORMAT, raw))?;
        }
        if let Some(raw) = lookup(ENV_TRACKING) {
            config.tracking = parse_switch(&raw).ok_or_else(|| unknown(ENV_TRACKING, raw))?;
        }
        if let Some(raw) = lookup(ENV_UNTRACKED_REALLOC) {
            config.untracked_realloc = UntrackedReallocPolicy::from_str_loose(&raw)
                .ok_or_else(|| unknown(ENV_UNTRACKED_REALLOC, raw))?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Zero is clamped to one byte.
    #[must_use]
    pub fn with_message_capacity(mut self, capacity: usize) -> Self {
        self.message_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: Severity) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_tracking(mut self, tracking: bool) -> Self {
        self.tracking = tracking;
        self
    }

    #[must_use]
    pub fn with_untracked_realloc(mut self, policy: UntrackedReallocPolicy) -> Self {
        self.untracked_realloc = policy;
        self
    }
}

fn parse_usize(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: raw.to_string(),
        })
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "enabled" => Some(true),
        "0" | "off" | "false" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

fn unknown(var: &'static str, value: String) -> ConfigError {
    ConfigError::UnknownValue { var, value }
}

struct LoadedConfig {
    config: RuntimeConfig,
    error: Option<ConfigError>,
}

static GLOBAL_CONFIG: OnceLock<LoadedConfig> = OnceLock::new();

fn loaded() -> &'static LoadedConfig {
    GLOBAL_CONFIG.get_or_init(|| match RuntimeConfig::from_env() {
        Ok(config) => LoadedConfig {
            config,
            error: None,
        },
        Err(error) => LoadedConfig {
            config: RuntimeConfig::default(),
            error: Some(error),
        },
    })
}

/// Process-wide configuration, read from the environment on first use.
///
/// An invalid environment falls back to defaults; the error stays available
/// through [`config_load_error`].
#[must_use]
pub fn runtime_config() -> &'static RuntimeConfig {
    &loaded().config
}

/// The error hit while reading the environment, if any.
#[must_use]
pub fn config_load_error() -> Option<&'static ConfigError> {
    loaded().error.as_ref()
}

/// Install `config` as the process-wide configuration.
///
/// Fails (returning the rejected config) once the configuration has been
/// read or installed.
pub fn install_config(config: RuntimeConfig) -> Result<(), RuntimeConfig> {
    GLOBAL_CONFIG
        .set(LoadedConfig {
            config,
            error: None,
        })
        .map_err(|rejected| rejected.config)
}
