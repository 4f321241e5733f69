//! Eviction Manager
//!
//! Decides which entries to remove so the store stays within its size and
//! entry-count bounds. Planning is pure: it reads the index and returns
//! victims, and the caller removes them inside its commit.

use std::fmt;
use std::str::FromStr;

use crate::cache::{Index, IndexEntry};

// == Policy ==
/// Which timestamp orders eviction candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Oldest `last_accessed_at` first
    #[default]
    LeastRecentlyUsed,
    /// Oldest `created_at` first; reads do not protect an entry
    LeastRecentlyStored,
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "least-recently-used" | "lru" => Ok(Self::LeastRecentlyUsed),
            "least-recently-stored" | "lrs" => Ok(Self::LeastRecentlyStored),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeastRecentlyUsed => f.write_str("least-recently-used"),
            Self::LeastRecentlyStored => f.write_str("least-recently-stored"),
        }
    }
}

/// How entries with equal timestamps are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Lower insertion number evicted first
    #[default]
    OldestFirst,
    /// Higher insertion number evicted first
    NewestFirst,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oldest-first" => Ok(Self::OldestFirst),
            "newest-first" => Ok(Self::NewestFirst),
            other => Err(format!("unknown eviction tie-break '{}'", other)),
        }
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OldestFirst => f.write_str("oldest-first"),
            Self::NewestFirst => f.write_str("newest-first"),
        }
    }
}

// == Eviction Order ==
/// Policy plus tie-break; maps an entry to its position in eviction order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOrder {
    pub policy: EvictionPolicy,
    pub tie_break: TieBreak,
}

/// Sort key of an entry in eviction order; smallest is evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvictionRank {
    primary: u64,
    tie: u64,
    seq: u64,
}

impl EvictionRank {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl EvictionOrder {
    pub fn new(policy: EvictionPolicy, tie_break: TieBreak) -> Self {
        Self { policy, tie_break }
    }

    pub fn rank(&self, entry: &IndexEntry) -> EvictionRank {
        let primary = match self.policy {
            EvictionPolicy::LeastRecentlyUsed => entry.last_accessed_at,
            EvictionPolicy::LeastRecentlyStored => entry.created_at,
        };
        let tie = match self.tie_break {
            TieBreak::OldestFirst => entry.seq,
            TieBreak::NewestFirst => u64::MAX - entry.seq,
        };
        EvictionRank {
            primary,
            tie,
            seq: entry.seq,
        }
    }
}

// == Planning ==
/// Configured store bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub max_size_bytes: u64,
    pub max_entries: usize,
}

/// An entry about to be written, for which room must be made.
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub key: &'a str,
    pub size_bytes: u64,
}

/// An entry chosen for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Victim {
    pub key: String,
    pub seq: u64,
    pub size_bytes: u64,
}

impl Victim {
    fn new(key: &str, entry: &IndexEntry) -> Self {
        Self {
            key: key.to_string(),
            seq: entry.seq,
            size_bytes: entry.size_bytes(),
        }
    }
}

/// Entries to remove, split by reason.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Entries past their expiration time
    pub expired: Vec<Victim>,
    /// Live entries removed to satisfy the bounds
    pub evicted: Vec<Victim>,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.evicted.is_empty()
    }

    pub fn victims(&self) -> impl Iterator<Item = &Victim> {
        self.expired.iter().chain(self.evicted.iter())
    }
}

/// Plans removals so that the index, after the optional `incoming` write,
/// fits within `bounds`.
///
/// Expired entries go first: all of them when over a bound, otherwise at
/// most `cull_limit`. Live entries then follow eviction order until both
/// bounds hold. The incoming key is never a victim; its current size is
/// already discounted.
pub fn plan(
    index: &Index,
    bounds: Bounds,
    incoming: Option<Incoming<'_>>,
    now: u64,
    cull_limit: usize,
) -> EvictionPlan {
    let mut size = index.total_size();
    let mut count = index.len();
    let skip = incoming.map(|incoming| incoming.key);

    if let Some(incoming) = incoming {
        if let Some(current) = index.get(incoming.key) {
            size -= current.size_bytes();
            count -= 1;
        }
        size += incoming.size_bytes;
        count += 1;
    }

    let over = |size: u64, count: usize| size > bounds.max_size_bytes || count > bounds.max_entries;
    let mut plan = EvictionPlan::default();

    let expired_budget = if over(size, count) {
        usize::MAX
    } else {
        cull_limit
    };
    for (key, entry) in index
        .iter_expired(now)
        .filter(|(key, _)| Some(*key) != skip)
        .take(expired_budget)
    {
        size -= entry.size_bytes();
        count -= 1;
        plan.expired.push(Victim::new(key, entry));
    }

    if over(size, count) {
        for (key, entry) in index.iter_eviction() {
            if !over(size, count) {
                break;
            }
            // Expired entries were all taken above
            if Some(key) == skip || entry.is_expired(now) {
                continue;
            }
            size -= entry.size_bytes();
            count -= 1;
            plan.evicted.push(Victim::new(key, entry));
        }
    }

    plan
}
