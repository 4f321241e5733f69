//! Index Module
//!
//! In-memory view of the journal: key to [`IndexEntry`], with ordered
//! secondary sets for insertion order, expiration order and eviction order
//! so each can be walked lazily from its cheapest end.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::cache::eviction::{EvictionOrder, EvictionRank};
use crate::cache::journal::Op;
use crate::cache::IndexEntry;

/// Order in which [`Index::iterate`] walks entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterOrder {
    /// Ascending insertion number
    Insertion,
    /// Ascending expiration time; entries without a TTL are skipped
    Expiration,
    /// Next eviction candidate first
    Eviction,
}

type Item<'a> = (&'a str, &'a IndexEntry);

// == Index ==
#[derive(Debug)]
pub struct Index {
    entries: HashMap<String, IndexEntry>,
    /// Insertion number to key
    by_seq: BTreeMap<u64, String>,
    /// (expires_at, seq) for entries with a TTL
    by_expiry: BTreeSet<(u64, u64)>,
    by_rank: BTreeSet<EvictionRank>,
    /// Sum of payload sizes over all entries
    total_size: u64,
    /// Highest insertion number issued or seen
    max_seq: u64,
    order: EvictionOrder,
}

impl Index {
    // == Constructor ==
    pub fn new(order: EvictionOrder) -> Self {
        Self {
            entries: HashMap::new(),
            by_seq: BTreeMap::new(),
            by_expiry: BTreeSet::new(),
            by_rank: BTreeSet::new(),
            total_size: 0,
            max_seq: 0,
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    // == Sequence Numbers ==
    /// Issues the next insertion number.
    pub fn next_seq(&mut self) -> u64 {
        self.max_seq += 1;
        self.max_seq
    }

    /// Lowest insertion number not yet issued.
    pub fn seq_floor(&self) -> u64 {
        self.max_seq + 1
    }

    // == Lookup ==
    /// Returns the entry for `key`, expired or not.
    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Returns the entry for `key` only if it is live at `now`.
    pub fn lookup(&self, key: &str, now: u64) -> Option<&IndexEntry> {
        self.entries.get(key).filter(|entry| !entry.is_expired(now))
    }

    // == Upsert ==
    /// Inserts or replaces the entry for `key`, returning the previous one.
    pub fn upsert(&mut self, key: String, entry: IndexEntry) -> Option<IndexEntry> {
        let previous = self.remove(&key);

        self.max_seq = self.max_seq.max(entry.seq);
        self.by_seq.insert(entry.seq, key.clone());
        if let Some(expires_at) = entry.expires_at {
            self.by_expiry.insert((expires_at, entry.seq));
        }
        self.by_rank.insert(self.order.rank(&entry));
        self.total_size += entry.size_bytes();
        self.entries.insert(key, entry);

        previous
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let entry = self.entries.remove(key)?;
        self.unlink(&entry);
        Some(entry)
    }

    /// Removes `key` only if its entry still carries insertion number `seq`.
    pub fn remove_if_seq(&mut self, key: &str, seq: u64) -> Option<IndexEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.seq == seq => self.remove(key),
            _ => None,
        }
    }

    fn unlink(&mut self, entry: &IndexEntry) {
        self.by_seq.remove(&entry.seq);
        if let Some(expires_at) = entry.expires_at {
            self.by_expiry.remove(&(expires_at, entry.seq));
        }
        self.by_rank.remove(&self.order.rank(entry));
        self.total_size -= entry.size_bytes();
    }

    // == Touch ==
    /// Moves the access time of `key` forward to `at`. Ignored if the entry
    /// was replaced (different `seq`) or already accessed later.
    pub fn touch(&mut self, key: &str, seq: u64, at: u64) -> bool {
        let order = self.order;
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.seq != seq || at <= entry.last_accessed_at {
            return false;
        }

        let old_rank = order.rank(entry);
        entry.last_accessed_at = at;
        let new_rank = order.rank(entry);
        if old_rank != new_rank {
            self.by_rank.remove(&old_rank);
            self.by_rank.insert(new_rank);
        }
        true
    }

    // == Clear ==
    /// Removes every entry and returns them. Insertion numbers keep counting.
    pub fn clear(&mut self) -> Vec<IndexEntry> {
        self.by_seq.clear();
        self.by_expiry.clear();
        self.by_rank.clear();
        self.total_size = 0;
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Empties the index ahead of a full journal replay.
    pub fn reset(&mut self, seq_floor: u64) {
        self.clear();
        self.max_seq = seq_floor.saturating_sub(1);
    }

    // == Apply ==
    /// Applies one journal operation and returns the entries it displaced.
    pub fn apply(&mut self, op: &Op) -> Vec<IndexEntry> {
        match op {
            Op::Put { key, entry } => self.upsert(key.clone(), entry.clone()).into_iter().collect(),
            Op::Remove { key, seq } => self.remove_if_seq(key, *seq).into_iter().collect(),
            Op::Touch { key, seq, at } => {
                self.touch(key, *seq, *at);
                Vec::new()
            }
            Op::Clear => self.clear(),
        }
    }

    // == Iterate ==
    /// Lazily walks entries in `order`, yielding those matching `predicate`.
    pub fn iterate<'a, P>(&'a self, order: IterOrder, mut predicate: P) -> impl Iterator<Item = Item<'a>> + 'a
    where
        P: FnMut(&str, &IndexEntry) -> bool + 'a,
    {
        let all: Box<dyn Iterator<Item = Item<'a>> + 'a> = match order {
            IterOrder::Insertion => Box::new(self.iter_insertion()),
            IterOrder::Expiration => Box::new(
                self.by_expiry
                    .iter()
                    .filter_map(move |(_, seq)| self.resolve(*seq)),
            ),
            IterOrder::Eviction => Box::new(self.iter_eviction()),
        };
        all.filter(move |&(key, entry)| predicate(key, entry))
    }

    pub fn iter_insertion(&self) -> impl Iterator<Item = Item<'_>> {
        self.by_seq.values().filter_map(move |key| {
            self.entries
                .get_key_value(key.as_str())
                .map(|(key, entry)| (key.as_str(), entry))
        })
    }

    /// Entries whose expiration time is at or before `now`, soonest first.
    pub fn iter_expired(&self, now: u64) -> impl Iterator<Item = Item<'_>> {
        self.by_expiry
            .range(..=(now, u64::MAX))
            .filter_map(move |(_, seq)| self.resolve(*seq))
    }

    pub fn iter_eviction(&self) -> impl Iterator<Item = Item<'_>> {
        self.by_rank
            .iter()
            .filter_map(move |rank| self.resolve(rank.seq()))
    }

    fn resolve(&self, seq: u64) -> Option<Item<'_>> {
        let key = self.by_seq.get(&seq)?;
        let entry = self.entries.get(key)?;
        Some((key.as_str(), entry))
    }

    // == Snapshots ==
    /// Payload files referenced by any entry. Inline payloads have none.
    pub fn live_files(&self) -> HashSet<String> {
        self.entries
            .values()
            .filter_map(|entry| entry.payload.file().map(str::to_string))
            .collect()
    }

    /// One `Put` per entry in insertion order, for journal compaction.
    pub fn snapshot(&self) -> Vec<Op> {
        self.iter_insertion()
            .map(|(key, entry)| Op::Put {
                key: key.to_string(),
                entry: entry.clone(),
            })
            .collect()
    }
}
