//! Cache Module
//!
//! Persistent disk-backed caching with TTL expiration and size-bounded
//! eviction, safe to share between threads and worker processes.
//!
//! # Layout
//! ```text
//! <store>/LOCK            advisory lock shared by all workers
//! <store>/LOCK.intent     held by a writer waiting for LOCK
//! <store>/index.journal   committed index transactions, small values inline
//! <store>/data/xx/*.val   one payload file per larger entry
//! ```

mod clock;
mod entry;
mod entry_store;
mod eviction;
mod index;
mod journal;
mod locks;
mod stats;
mod store;


// Re-export public types
pub use clock::HybridClock;
pub use entry::{Attributes, CachedValue, DeleteOutcome, EntryRef, IndexEntry, Location, SetOutcome};
pub use entry_store::{digest_hex, EntryStore};
pub use eviction::{Bounds, EvictionOrder, EvictionPlan, EvictionPolicy, TieBreak, Victim};
pub use index::{Index, IterOrder};
pub use journal::{Journal, Op, Txn};
pub use locks::{KeyLocks, StoreLock};
pub use stats::{StatsCounters, StoreStats};
pub use store::{DiskCache, SweepReport};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Journal file name inside the store directory
pub const JOURNAL_FILE: &str = "index.journal";

/// Lock file name inside the store directory
pub const LOCK_FILE: &str = "LOCK";

/// Writer intent lock file name inside the store directory
pub const INTENT_FILE: &str = "LOCK.intent";

/// Payload directory name inside the store directory
pub const DATA_DIR: &str = "data";

/// Journal transactions tolerated before compaction is considered
pub const COMPACT_MIN_TXNS: u64 = 1024;
