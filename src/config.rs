//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::cache::{EvictionOrder, EvictionPolicy, TieBreak};
use crate::error::{CacheError, Result};

const GIB: u64 = 1 << 30;
const MIB: u64 = 1 << 20;
const KIB: u64 = 1 << 10;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the journal, lock file and payloads
    pub store_dir: PathBuf,
    /// Maximum total payload bytes
    pub max_size_bytes: u64,
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// Maximum size of a single value in bytes
    pub max_value_size: u64,
    /// Default TTL in seconds for entries without explicit TTL (0 = never expire)
    pub default_ttl: u64,
    /// Longest wait for any lock, in milliseconds
    pub lock_timeout_ms: u64,
    /// Background sweep interval in seconds
    pub sweep_interval: u64,
    /// Expired entries reclaimed opportunistically per write
    pub cull_limit: usize,
    pub eviction_policy: EvictionPolicy,
    pub tie_break: TieBreak,
    /// Minimum age in seconds before an unreferenced payload file is deleted
    pub orphan_grace: u64,
    /// Seconds between scans of the payload tree for orphans
    pub orphan_scan_interval: u64,
    /// Values smaller than this many bytes are stored inline in the journal
    pub min_file_size: u64,
    /// Longest a read's access-time update may wait before it is journaled,
    /// in milliseconds (0 = journal on every hit)
    pub touch_flush_ms: u64,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DIRECTORY` - Store directory (default: /tmp/diskcache)
    /// - `CACHE_SIZE_LIMIT` - Maximum total bytes (default: 8 GiB)
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 1000000)
    /// - `VALUE_SIZE_LIMIT` - Maximum single value bytes (default: 300 MiB)
    /// - `DEFAULT_TTL` - Default TTL in seconds, 0 = never (default: 86400)
    /// - `LOCK_TIMEOUT_MS` - Lock wait limit in milliseconds (default: 60000)
    /// - `SWEEP_INTERVAL` - Sweep frequency in seconds (default: 60)
    /// - `CULL_LIMIT` - Expired entries reclaimed per write (default: 10)
    /// - `EVICTION_POLICY` - least-recently-used | least-recently-stored
    /// - `EVICTION_TIE_BREAK` - oldest-first | newest-first
    /// - `ORPHAN_GRACE` - Orphan payload age in seconds (default: 300)
    /// - `ORPHAN_SCAN_INTERVAL` - Orphan scan frequency in seconds (default: 3600)
    /// - `MIN_FILE_SIZE` - Smallest value stored as its own file (default: 32 KiB)
    /// - `TOUCH_FLUSH_MS` - Access-time batching window in milliseconds (default: 0)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            store_dir: env::var("CACHE_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            max_size_bytes: env_or("CACHE_SIZE_LIMIT", defaults.max_size_bytes),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            max_value_size: env_or("VALUE_SIZE_LIMIT", defaults.max_value_size),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            lock_timeout_ms: env_or("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            sweep_interval: env_or("SWEEP_INTERVAL", defaults.sweep_interval),
            cull_limit: env_or("CULL_LIMIT", defaults.cull_limit),
            eviction_policy: env_or("EVICTION_POLICY", defaults.eviction_policy),
            tie_break: env_or("EVICTION_TIE_BREAK", defaults.tie_break),
            orphan_grace: env_or("ORPHAN_GRACE", defaults.orphan_grace),
            orphan_scan_interval: env_or("ORPHAN_SCAN_INTERVAL", defaults.orphan_scan_interval),
            min_file_size: env_or("MIN_FILE_SIZE", defaults.min_file_size),
            touch_flush_ms: env_or("TOUCH_FLUSH_MS", defaults.touch_flush_ms),
            server_port: env_or("SERVER_PORT", defaults.server_port),
        }
    }

    /// Engine settings derived from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            dir: self.store_dir.clone(),
            max_size_bytes: self.max_size_bytes,
            max_entries: self.max_entries,
            max_value_size: self.max_value_size,
            default_ttl: (self.default_ttl > 0).then(|| Duration::from_secs(self.default_ttl)),
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            cull_limit: self.cull_limit,
            eviction: EvictionOrder::new(self.eviction_policy, self.tie_break),
            orphan_grace: Duration::from_secs(self.orphan_grace),
            orphan_scan_interval: Duration::from_secs(self.orphan_scan_interval),
            min_file_size: self.min_file_size,
            touch_flush_interval: Duration::from_millis(self.touch_flush_ms),
        }
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval == 0 {
            return Err(CacheError::InvalidRequest(
                "SWEEP_INTERVAL must be at least 1 second".to_string(),
            ));
        }
        self.store_config().validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("/tmp/diskcache"),
            max_size_bytes: 8 * GIB,
            max_entries: 1_000_000,
            max_value_size: 300 * MIB,
            default_ttl: 24 * 60 * 60,
            lock_timeout_ms: 60_000,
            sweep_interval: 60,
            cull_limit: 10,
            eviction_policy: EvictionPolicy::default(),
            tie_break: TieBreak::default(),
            orphan_grace: 300,
            orphan_scan_interval: 60 * 60,
            min_file_size: 32 * KIB,
            touch_flush_ms: 0,
            server_port: 3000,
        }
    }
}

/// Reads and parses an environment variable, falling back to `default` when
/// it is unset or unparseable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "Ignoring unparseable setting");
            default
        }),
        Err(_) => default,
    }
}

// == Store Config ==
/// Settings for [`DiskCache`](crate::cache::DiskCache), fixed at open.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,
    pub max_size_bytes: u64,
    pub max_entries: usize,
    pub max_value_size: u64,
    /// TTL applied when `set` is given none; None = never expire
    pub default_ttl: Option<Duration>,
    pub lock_timeout: Duration,
    pub cull_limit: usize,
    pub eviction: EvictionOrder,
    pub orphan_grace: Duration,
    /// Sweeps scan the payload tree for orphans at most this often
    pub orphan_scan_interval: Duration,
    /// Values below this size skip the payload tree
    pub min_file_size: u64,
    /// Read access times are journaled once the oldest unflushed one is
    /// this old
    pub touch_flush_interval: Duration,
}

impl StoreConfig {
    /// Settings for a store in `dir` with the server defaults, except that
    /// entries never expire unless given a TTL.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut config = Config {
            store_dir: dir.into(),
            ..Config::default()
        }
        .store_config();
        config.default_ttl = None;
        config
    }

    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_value_size(mut self, max_value_size: u64) -> Self {
        self.max_value_size = max_value_size;
        self
    }

    pub fn with_default_ttl(mut self, default_ttl: Option<Duration>) -> Self {
        self.default_ttl = default_ttl;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_cull_limit(mut self, cull_limit: usize) -> Self {
        self.cull_limit = cull_limit;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionOrder) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_orphan_grace(mut self, orphan_grace: Duration) -> Self {
        self.orphan_grace = orphan_grace;
        self
    }

    pub fn with_orphan_scan_interval(mut self, orphan_scan_interval: Duration) -> Self {
        self.orphan_scan_interval = orphan_scan_interval;
        self
    }

    pub fn with_min_file_size(mut self, min_file_size: u64) -> Self {
        self.min_file_size = min_file_size;
        self
    }

    pub fn with_touch_flush_interval(mut self, touch_flush_interval: Duration) -> Self {
        self.touch_flush_interval = touch_flush_interval;
        self
    }

    /// Rejects bounds the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 || self.max_entries == 0 || self.max_value_size == 0 {
            return Err(CacheError::InvalidRequest(
                "size, entry and value limits must be greater than zero".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(CacheError::InvalidRequest(
                "lock timeout must be greater than zero".to_string(),
            ));
        }
        if self.orphan_grace < self.lock_timeout {
            warn!(
                orphan_grace = ?self.orphan_grace,
                lock_timeout = ?self.lock_timeout,
                "Orphan grace is shorter than the lock timeout; a slow writer's payload may be reclaimed before it commits"
            );
        }
        Ok(())
    }
}
