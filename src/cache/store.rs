//! Cache Store Module
//!
//! [`DiskCache`] ties payload files, the journal-backed index, eviction
//! planning and locking together into the public cache engine.
//!
//! Every mutation runs as one commit: take the exclusive store lock, catch
//! the index up with the journal, apply operations to the index, append them
//! as one transaction, then release the lock and delete the payloads the
//! transaction superseded. Readers take the shared lock and never write the
//! journal themselves; the access-time updates and reclaims they discover are
//! queued and folded into the next commit. Under LRU eviction a hit starts a
//! commit of its own once its queued touch is due, so other workers rank
//! entries by reads they did not see.

use std::collections::HashMap;
use std::fs;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::eviction::{self, Bounds, EvictionPlan, EvictionPolicy, Incoming};
use crate::cache::journal::CatchUp;
use crate::cache::locks::ExclusiveGuard;
use crate::cache::{
    Attributes, CachedValue, DeleteOutcome, EntryRef, EntryStore, HybridClock, Index, IndexEntry,
    IterOrder, Journal, KeyLocks, Op, SetOutcome, StatsCounters, StoreLock, StoreStats,
    COMPACT_MIN_TXNS, DATA_DIR, JOURNAL_FILE, MAX_KEY_LENGTH,
};
use crate::config::StoreConfig;
use crate::error::{CacheError, Result};

/// Reads retried when an entry is replaced between lookup and payload read
const READ_ATTEMPTS: usize = 2;

// == Sweep Report ==
/// What one [`DiskCache::sweep`] pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired entries removed
    pub expired: usize,
    /// Live entries evicted to restore the bounds
    pub evicted: usize,
    /// Expired or corrupt entries reported by readers
    pub reclaimed: usize,
    /// Unreferenced payload files deleted
    pub orphans: usize,
    /// Whether the journal was rewritten
    pub compacted: bool,
}

impl SweepReport {
    fn removed_anything(&self) -> bool {
        self.expired + self.evicted + self.reclaimed + self.orphans > 0 || self.compacted
    }
}

// == Internal State ==
#[derive(Debug)]
struct StoreState {
    index: Index,
    journal: Journal,
}

impl StoreState {
    /// Brings the index up to date with the journal on disk.
    fn catch_up(&mut self, clock: &HybridClock, repair: bool) -> Result<()> {
        let txns = match self.journal.catch_up(repair)? {
            CatchUp::Reload { seq_floor, txns } => {
                debug!(journal = ?self.journal.path(), "Reloading index from journal");
                self.index.reset(seq_floor);
                txns
            }
            CatchUp::Append(txns) => txns,
        };

        for op in txns.iter().flat_map(|txn| txn.ops.iter()) {
            match op {
                Op::Put { entry, .. } => clock.observe(entry.last_accessed_at),
                Op::Touch { at, .. } => clock.observe(*at),
                Op::Remove { .. } | Op::Clear => {}
            }
            self.index.apply(op);
        }
        Ok(())
    }
}

/// Work discovered by readers, flushed by the next commit.
#[derive(Debug, Default)]
struct PendingWork {
    /// key -> (seq, accessed_at) of the latest read
    touches: HashMap<String, (u64, u64)>,
    /// key -> seq of entries found expired or corrupt
    reclaims: HashMap<String, u64>,
    /// When the oldest unflushed touch was queued
    oldest_touch: Option<Instant>,
}

impl PendingWork {
    fn is_doomed(&self, key: &str, seq: u64) -> bool {
        self.reclaims.get(key) == Some(&seq)
    }
}

/// An open exclusive section.
struct Commit<'a> {
    _guard: ExclusiveGuard<'a>,
    state: RwLockWriteGuard<'a, StoreState>,
    ops: Vec<Op>,
    /// Payloads no longer referenced once the ops are committed
    superseded: Vec<EntryRef>,
    reclaimed: usize,
}

impl Commit<'_> {
    fn apply(&mut self, op: Op) -> Vec<IndexEntry> {
        let displaced = self.state.index.apply(&op);
        self.superseded
            .extend(displaced.iter().map(|entry| entry.payload.clone()));
        self.ops.push(op);
        displaced
    }

    fn holds(&self, key: &str, seq: u64) -> bool {
        self.state
            .index
            .get(key)
            .is_some_and(|entry| entry.seq == seq)
    }

    fn apply_plan(&mut self, plan: &EvictionPlan) {
        for victim in plan.victims() {
            self.apply(Op::Remove {
                key: victim.key.clone(),
                seq: victim.seq,
            });
        }
    }
}

// == Disk Cache ==
/// Persistent key-value cache backed by a directory.
///
/// Any number of handles, in one process or many, may open the same
/// directory. All methods take `&self`; share a handle with `Arc`.
#[derive(Debug)]
pub struct DiskCache {
    config: StoreConfig,
    entries: EntryStore,
    state: RwLock<StoreState>,
    pending: Mutex<PendingWork>,
    key_locks: KeyLocks,
    store_lock: StoreLock,
    clock: HybridClock,
    stats: StatsCounters,
    last_orphan_scan: Mutex<Option<Instant>>,
}

impl DiskCache {
    // == Constructor ==
    /// Opens or creates the store described by `config`.
    ///
    /// Opening recovers from any earlier crash: a torn journal tail is
    /// truncated, expired entries and unreferenced payloads are reclaimed and
    /// the bounds are enforced.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir)?;

        let store_lock = StoreLock::open(&config.dir, config.lock_timeout)?;
        let entries = EntryStore::open(
            config.dir.join(DATA_DIR),
            config.max_value_size,
            config.min_file_size,
        )?;
        let state = StoreState {
            index: Index::new(config.eviction),
            journal: Journal::new(config.dir.join(JOURNAL_FILE)),
        };

        let cache = Self {
            key_locks: KeyLocks::new(config.lock_timeout),
            entries,
            state: RwLock::new(state),
            pending: Mutex::new(PendingWork::default()),
            store_lock,
            clock: HybridClock::new(),
            stats: StatsCounters::new(),
            last_orphan_scan: Mutex::new(None),
            config,
        };

        {
            let _guard = cache.store_lock.exclusive()?;
            if cache.write_state()?.journal.ensure_exists()? {
                info!(dir = ?cache.config.dir, "Created new cache store");
            }
        }

        let report = cache.sweep()?;
        let stats = cache.stats()?;
        info!(
            dir = ?cache.config.dir,
            entries = stats.entry_count,
            total_size_bytes = stats.total_size_bytes,
            expired = report.expired,
            evicted = report.evicted,
            orphans = report.orphans,
            "Cache store opened"
        );
        Ok(cache)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// `ttl` falls back to the configured default. Entries are evicted as
    /// needed so the store stays within its bounds after the write. Size
    /// limits are checked before anything touches the disk.
    pub fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        attributes: Attributes,
    ) -> Result<SetOutcome> {
        validate_key(key)?;
        self.check_value_size(value.len() as u64)?;
        let ttl = ttl.or(self.config.default_ttl);

        let _key_guard = self.key_locks.lock(key)?;
        let payload = self.entries.write(value)?;
        self.commit_put(key, payload, ttl, attributes)
    }

    fn check_value_size(&self, size: u64) -> Result<()> {
        self.entries.check_size(size)?;
        if size > self.config.max_size_bytes {
            return Err(CacheError::ValueTooLarge {
                size,
                limit: self.config.max_size_bytes,
            });
        }
        Ok(())
    }

    fn commit_put(
        &self,
        key: &str,
        payload: EntryRef,
        ttl: Option<Duration>,
        attributes: Attributes,
    ) -> Result<SetOutcome> {
        let mut commit = match self.begin() {
            Ok(commit) => commit,
            Err(err) => {
                self.entries.remove_superseded([&payload]);
                return Err(err);
            }
        };

        let now = self.clock.tick();
        let size_bytes = payload.size_bytes;
        let plan = eviction::plan(
            &commit.state.index,
            self.bounds(),
            Some(Incoming { key, size_bytes }),
            now,
            self.config.cull_limit,
        );
        commit.apply_plan(&plan);

        let seq = commit.state.index.next_seq();
        let entry = IndexEntry::new(seq, payload, now, ttl, attributes);
        let displaced = commit.apply(Op::Put {
            key: key.to_string(),
            entry,
        });
        let outcome = if displaced.iter().any(|old| !old.is_expired(now)) {
            SetOutcome::Replaced
        } else {
            SetOutcome::Created
        };

        self.finish(commit)?;
        self.stats.record_evictions(plan.evicted.len());
        debug!(
            key,
            seq,
            size_bytes,
            expired = plan.expired.len(),
            evicted = plan.evicted.len(),
            ?outcome,
            "Entry stored"
        );
        Ok(outcome)
    }

    // == Get ==
    /// Returns the value stored under `key`, or None if it is absent,
    /// expired or its payload fails verification.
    ///
    /// A hit moves the entry's access time forward.
    pub fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        validate_key(key)?;

        for _ in 0..READ_ATTEMPTS {
            let Some(entry) = self.find(key)? else {
                self.stats.record_miss();
                return Ok(None);
            };

            match self.entries.read(&entry.payload) {
                Ok(Some(data)) => {
                    self.record_access(key, entry.seq);
                    self.stats.record_hit();
                    return Ok(Some(CachedValue {
                        data,
                        digest: entry.payload.digest,
                        created_at: entry.created_at,
                        expires_at: entry.expires_at,
                        attributes: entry.attributes,
                    }));
                }
                Ok(None) => {
                    if self.is_committed(key, entry.seq)? {
                        warn!(key, file = ?entry.payload.file(), "Payload missing for committed entry");
                        self.doom(key, entry.seq);
                        self.stats.record_miss();
                        return Ok(None);
                    }
                    debug!(key, "Entry replaced during read, retrying");
                }
                Err(CacheError::StoreCorruption(reason)) => {
                    warn!(key, reason = %reason, "Dropping corrupt cache entry");
                    self.doom(key, entry.seq);
                    self.stats.record_miss();
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }

        self.stats.record_miss();
        Ok(None)
    }

    // == Exists ==
    /// Returns true if a live entry exists. Does not count as an access.
    pub fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.find(key)?.is_some())
    }

    // == Delete ==
    /// Removes the entry for `key`. Deleting an absent or expired key is
    /// not an error.
    pub fn delete(&self, key: &str) -> Result<DeleteOutcome> {
        validate_key(key)?;
        let _key_guard = self.key_locks.lock(key)?;
        let mut commit = self.begin()?;

        let now = self.clock.peek();
        let current = commit
            .state
            .index
            .get(key)
            .map(|entry| (entry.seq, entry.is_expired(now)));
        let outcome = match current {
            Some((seq, expired)) => {
                commit.apply(Op::Remove {
                    key: key.to_string(),
                    seq,
                });
                if expired {
                    DeleteOutcome::AlreadyAbsent
                } else {
                    DeleteOutcome::Removed
                }
            }
            None => DeleteOutcome::AlreadyAbsent,
        };

        self.finish(commit)?;
        debug!(key, ?outcome, "Entry deleted");
        Ok(outcome)
    }

    // == Clear ==
    /// Removes every entry and returns how many there were.
    pub fn clear(&self) -> Result<usize> {
        let mut commit = self.begin()?;
        let removed = commit.state.index.len();
        if removed > 0 {
            commit.apply(Op::Clear);
        }
        self.finish(commit)?;

        info!(removed, "Cache cleared");
        Ok(removed)
    }

    // == Stats ==
    /// Current size and bounds of the store plus this handle's counters.
    pub fn stats(&self) -> Result<StoreStats> {
        let _guard = self.store_lock.shared()?;
        self.refresh()?;
        let state = self.read_state()?;
        let (hits, misses, evictions) = self.stats.load();

        Ok(StoreStats {
            entry_count: state.index.len(),
            total_size_bytes: state.index.total_size(),
            max_size_bytes: self.config.max_size_bytes,
            max_entry_count: self.config.max_entries,
            hits,
            misses,
            evictions,
        })
    }

    // == Keys ==
    /// Up to `limit` live keys, oldest insertion first.
    pub fn keys(&self, limit: usize) -> Result<Vec<String>> {
        let _guard = self.store_lock.shared()?;
        self.refresh()?;
        let state = self.read_state()?;
        let pending = self.pending.lock();
        let now = self.clock.peek();

        let keys = state
            .index
            .iterate(IterOrder::Insertion, |key, entry| {
                !entry.is_expired(now) && !pending.is_doomed(key, entry.seq)
            })
            .take(limit)
            .map(|(key, _)| key.to_string())
            .collect();
        Ok(keys)
    }

    // == Sweep ==
    /// Reclaims every expired entry, enforces the bounds and compacts the
    /// journal when due. Unreferenced payload files are deleted on the first
    /// sweep and then once per orphan scan interval.
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut commit = self.begin()?;
        let now = self.clock.peek();
        let plan = eviction::plan(&commit.state.index, self.bounds(), None, now, usize::MAX);
        commit.apply_plan(&plan);

        let reclaimed = commit.reclaimed;
        let live = self
            .orphan_scan_due()
            .then(|| commit.state.index.live_files());
        let compacted = self.finish(commit)?;
        let orphans = match live {
            Some(live) => self
                .entries
                .reclaim_orphans(&live, self.config.orphan_grace)?,
            None => 0,
        };
        self.stats.record_evictions(plan.evicted.len());

        let report = SweepReport {
            expired: plan.expired.len(),
            evicted: plan.evicted.len(),
            reclaimed,
            orphans,
            compacted,
        };
        if report.removed_anything() {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                reclaimed = report.reclaimed,
                orphans = report.orphans,
                compacted = report.compacted,
                "Sweep finished"
            );
        } else {
            debug!("Sweep found nothing to do");
        }
        Ok(report)
    }

    // == Commit Protocol ==
    /// Opens an exclusive section with the index caught up and reader work
    /// folded in.
    fn begin(&self) -> Result<Commit<'_>> {
        let guard = self.store_lock.exclusive()?;
        let mut state = self.write_state()?;
        state.catch_up(&self.clock, true)?;

        let pending = std::mem::take(&mut *self.pending.lock());
        let mut commit = Commit {
            _guard: guard,
            state,
            ops: Vec::new(),
            superseded: Vec::new(),
            reclaimed: 0,
        };

        for (key, seq) in pending.reclaims {
            if commit.holds(&key, seq) {
                commit.apply(Op::Remove { key, seq });
                commit.reclaimed += 1;
            }
        }
        for (key, (seq, at)) in pending.touches {
            if commit.holds(&key, seq) {
                commit.apply(Op::Touch { key, seq, at });
            }
        }
        Ok(commit)
    }

    /// Appends the commit's operations as one transaction, compacts the
    /// journal when due and deletes superseded payloads once the locks are
    /// released. Returns true if the journal was compacted.
    fn finish(&self, commit: Commit<'_>) -> Result<bool> {
        let Commit {
            _guard: guard,
            mut state,
            ops,
            superseded,
            ..
        } = commit;

        if !ops.is_empty() {
            state.journal.append(ops)?;
        }

        let mut compacted = false;
        if state.journal.needs_compaction(state.index.len(), COMPACT_MIN_TXNS) {
            let next_seq = state.index.seq_floor();
            let snapshot = state.index.snapshot();
            match state.journal.compact(next_seq, snapshot) {
                Ok(()) => compacted = true,
                Err(err) => warn!(error = %err, "Journal compaction failed"),
            }
        }

        drop(state);
        drop(guard);
        self.entries.remove_superseded(&superseded);
        Ok(compacted)
    }

    // == Reader Helpers ==
    /// Catches the index up if another handle committed since the last look.
    /// Caller holds the shared store lock.
    fn refresh(&self) -> Result<()> {
        if self.read_state()?.journal.is_current() {
            return Ok(());
        }
        self.write_state()?.catch_up(&self.clock, false)
    }

    /// Live, readable entry for `key`. Expired entries found on the way are
    /// queued for reclaim.
    fn find(&self, key: &str) -> Result<Option<IndexEntry>> {
        let _guard = self.store_lock.shared()?;
        self.refresh()?;
        let state = self.read_state()?;
        let now = self.clock.peek();
        let mut pending = self.pending.lock();

        match state.index.lookup(key, now) {
            Some(entry) if pending.is_doomed(key, entry.seq) => Ok(None),
            Some(entry) => Ok(Some(entry.clone())),
            None => {
                if let Some(expired) = state.index.get(key) {
                    pending.reclaims.insert(key.to_string(), expired.seq);
                    debug!(key, "Entry expired, queued for reclaim");
                }
                Ok(None)
            }
        }
    }

    fn is_committed(&self, key: &str, seq: u64) -> Result<bool> {
        let _guard = self.store_lock.shared()?;
        self.refresh()?;
        let state = self.read_state()?;
        Ok(state.index.get(key).is_some_and(|entry| entry.seq == seq))
    }

    /// Hides an unreadable entry from readers until a commit removes it.
    fn doom(&self, key: &str, seq: u64) {
        self.pending.lock().reclaims.insert(key.to_string(), seq);
    }

    fn record_access(&self, key: &str, seq: u64) {
        let at = self.clock.tick();
        if let Some(mut state) = self.state.try_write_for(self.config.lock_timeout) {
            state.index.touch(key, seq, at);
        }
        let due = {
            let mut pending = self.pending.lock();
            pending.touches.insert(key.to_string(), (seq, at));
            let oldest = *pending.oldest_touch.get_or_insert_with(Instant::now);
            oldest.elapsed() >= self.config.touch_flush_interval
        };

        // Only LRU ranks entries by access time
        if due && self.config.eviction.policy == EvictionPolicy::LeastRecentlyUsed {
            self.flush_pending();
        }
    }

    /// Journals queued reader work in a commit of its own. A failure leaves
    /// the work for the next commit.
    fn flush_pending(&self) {
        if let Err(err) = self.begin().and_then(|commit| self.finish(commit)) {
            warn!(error = %err, "Failed to journal access times");
        }
    }

    fn orphan_scan_due(&self) -> bool {
        let mut last = self.last_orphan_scan.lock();
        let due = last.is_none_or(|at| at.elapsed() >= self.config.orphan_scan_interval);
        if due {
            *last = Some(Instant::now());
        }
        due
    }

    fn bounds(&self) -> Bounds {
        Bounds {
            max_size_bytes: self.config.max_size_bytes,
            max_entries: self.config.max_entries,
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .try_read_for(self.config.lock_timeout)
            .ok_or_else(|| CacheError::Timeout("index read lock".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .try_write_for(self.config.lock_timeout)
            .ok_or_else(|| CacheError::Timeout("index write lock".to_string()))
    }
}

// == Validation ==
/// Rejects keys that are empty, too long or contain control characters.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(CacheError::InvalidRequest(
            "Key cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LOCK_FILE;
    use std::thread::sleep;
    use tempfile::TempDir;

    /// Every value gets its own payload file unless a test says otherwise.
    fn config(dir: &TempDir) -> StoreConfig {
        StoreConfig::new(dir.path())
            .with_lock_timeout(Duration::from_secs(5))
            .with_min_file_size(0)
    }

    fn open(dir: &TempDir) -> DiskCache {
        DiskCache::open(config(dir)).unwrap()
    }

    fn put(cache: &DiskCache, key: &str, value: &[u8]) -> SetOutcome {
        cache.set(key, value, None, Attributes::new()).unwrap()
    }

    fn value_of(cache: &DiskCache, key: &str) -> Option<Vec<u8>> {
        cache.get(key).unwrap().map(|value| value.data)
    }

    fn payload_file(cache: &DiskCache, key: &str) -> String {
        let state = cache.read_state().unwrap();
        state.index.get(key).unwrap().payload.file().unwrap().to_string()
    }

    fn journal_text(dir: &TempDir) -> String {
        fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap()
    }

    #[test]
    fn test_store_open_empty() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.total_size_bytes, 0);
        assert!(dir.path().join(JOURNAL_FILE).exists());
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_store_set_and_get() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert_eq!(put(&cache, "key1", b"value1"), SetOutcome::Created);
        let value = cache.get("key1").unwrap().unwrap();

        assert_eq!(value.data, b"value1");
        assert_eq!(value.digest, crate::cache::digest_hex(b"value1"));
        assert_eq!(value.expires_at, None);
        assert_eq!(cache.stats().unwrap().entry_count, 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert!(cache.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_store_delete() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        put(&cache, "key1", b"value1");
        assert_eq!(cache.delete("key1").unwrap(), DeleteOutcome::Removed);
        assert_eq!(cache.delete("key1").unwrap(), DeleteOutcome::AlreadyAbsent);

        assert!(cache.get("key1").unwrap().is_none());
        assert_eq!(cache.stats().unwrap().total_size_bytes, 0);
    }

    #[test]
    fn test_store_overwrite() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        put(&cache, "key1", b"value1");
        assert_eq!(put(&cache, "key1", b"second"), SetOutcome::Replaced);

        assert_eq!(value_of(&cache, "key1").unwrap(), b"second");
        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_size_bytes, 6);
    }

    #[test]
    fn test_store_overwrite_removes_old_payload() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        put(&cache, "key1", b"value1");
        put(&cache, "key1", b"value2");

        let live = cache.read_state().unwrap().index.live_files();
        let orphans = cache.entries.reclaim_orphans(&live, Duration::ZERO).unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache
            .set("key1", b"value1", Some(Duration::from_millis(10)), Attributes::new())
            .unwrap();
        assert!(cache.exists("key1").unwrap());

        sleep(Duration::from_millis(20));

        assert!(cache.get("key1").unwrap().is_none());
        assert!(!cache.exists("key1").unwrap());
        // Writing over an expired entry creates a new one
        assert_eq!(put(&cache, "key1", b"again"), SetOutcome::Created);
    }

    #[test]
    fn test_store_default_ttl_applies() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(
            config(&dir).with_default_ttl(Some(Duration::from_secs(60))),
        )
        .unwrap();

        put(&cache, "key1", b"value1");

        let value = cache.get("key1").unwrap().unwrap();
        let expires_at = value.expires_at.unwrap();
        assert_eq!(expires_at - value.created_at, 60_000_000_000);
    }

    #[test]
    fn test_store_lru_eviction() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(config(&dir).with_max_entries(3)).unwrap();

        put(&cache, "key1", b"value1");
        put(&cache, "key2", b"value2");
        put(&cache, "key3", b"value3");
        put(&cache, "key4", b"value4");

        assert_eq!(cache.stats().unwrap().entry_count, 3);
        assert!(cache.get("key1").unwrap().is_none());
        assert!(cache.get("key2").unwrap().is_some());
        assert!(cache.get("key4").unwrap().is_some());
        assert_eq!(cache.stats().unwrap().evictions, 1);
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(config(&dir).with_max_entries(3)).unwrap();

        put(&cache, "key1", b"value1");
        put(&cache, "key2", b"value2");
        put(&cache, "key3", b"value3");

        // Access key1 to make it most recently used
        cache.get("key1").unwrap().unwrap();
        put(&cache, "key4", b"value4");

        assert!(cache.exists("key1").unwrap());
        assert!(!cache.exists("key2").unwrap());
    }

    #[test]
    fn test_store_exists_is_not_an_access() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(config(&dir).with_max_entries(2)).unwrap();

        put(&cache, "a", b"1");
        put(&cache, "b", b"2");
        assert!(cache.exists("a").unwrap());
        put(&cache, "c", b"3");

        assert!(!cache.exists("a").unwrap());
        assert!(cache.exists("b").unwrap());
    }

    #[test]
    fn test_store_size_bound_evicts_older_entry() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(config(&dir).with_max_size_bytes(100)).unwrap();

        put(&cache, "a", &[1u8; 60]);
        put(&cache, "b", &[2u8; 60]);

        assert!(!cache.exists("a").unwrap());
        assert!(cache.exists("b").unwrap());
        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_size_bytes, 60);
    }

    #[test]
    fn test_store_stats() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        put(&cache, "key1", b"value1");
        cache.get("key1").unwrap(); // hit
        cache.get("nonexistent").unwrap(); // miss

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_store_sweep_expired() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache
            .set("key1", b"value1", Some(Duration::from_millis(10)), Attributes::new())
            .unwrap();
        cache
            .set("key2", b"value2", Some(Duration::from_secs(60)), Attributes::new())
            .unwrap();
        sleep(Duration::from_millis(20));

        let report = cache.sweep().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(cache.stats().unwrap().entry_count, 1);
        assert!(cache.exists("key2").unwrap());
    }

    #[test]
    fn test_store_clear_and_keys() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        put(&cache, "b", b"2");
        put(&cache, "a", b"1");
        put(&cache, "c", b"3");
        assert_eq!(cache.keys(2).unwrap(), vec!["b", "a"]);

        assert_eq!(cache.clear().unwrap(), 3);
        assert!(cache.keys(10).unwrap().is_empty());
        assert_eq!(cache.stats().unwrap().total_size_bytes, 0);
    }

    #[test]
    fn test_store_corrupt_payload_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        put(&cache, "key1", b"value1");

        let file = payload_file(&cache, "key1");
        fs::write(cache.entries.path_of(&file), b"garbage").unwrap();

        assert!(cache.get("key1").unwrap().is_none());
        assert!(!cache.exists("key1").unwrap());
        assert!(cache.keys(10).unwrap().is_empty());

        let report = cache.sweep().unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(cache.stats().unwrap().entry_count, 0);
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir);
            put(&cache, "key1", b"value1");
            put(&cache, "key2", b"value2");
            cache.delete("key2").unwrap();
        }

        let cache = open(&dir);
        assert_eq!(value_of(&cache, "key1").unwrap(), b"value1");
        assert!(cache.get("key2").unwrap().is_none());
    }

    #[test]
    fn test_store_attributes_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let mut attributes = Attributes::new();
        attributes.insert("content-type".to_string(), "text/plain".to_string());

        cache.set("key1", b"hello", None, attributes.clone()).unwrap();

        assert_eq!(cache.get("key1").unwrap().unwrap().attributes, attributes);
    }

    #[test]
    fn test_store_key_validation() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);

        for key in ["", long_key.as_str(), "bad\nkey"] {
            let result = cache.set(key, b"value", None, Attributes::new());
            assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
        }
    }

    #[test]
    fn test_store_value_too_large() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(config(&dir).with_max_value_size(8)).unwrap();
        put(&cache, "small", b"ok");
        let before = cache.stats().unwrap();

        let result = cache.set("big", &[0u8; 9], None, Attributes::new());

        assert!(matches!(
            result,
            Err(CacheError::ValueTooLarge { size: 9, limit: 8 })
        ));
        assert_eq!(cache.stats().unwrap(), before);
    }

    #[test]
    fn test_store_value_larger_than_store() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(config(&dir).with_max_size_bytes(16)).unwrap();

        let result = cache.set("big", &[0u8; 17], None, Attributes::new());

        assert!(matches!(
            result,
            Err(CacheError::ValueTooLarge { size: 17, limit: 16 })
        ));
    }

    #[test]
    fn test_store_compacts_journal() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        for round in 0..(COMPACT_MIN_TXNS + 10) {
            put(&cache, "hot", round.to_string().as_bytes());
        }

        let txns = cache.read_state().unwrap().journal.txn_count();
        assert!(txns < COMPACT_MIN_TXNS);
        drop(cache);

        let cache = open(&dir);
        let expected = (COMPACT_MIN_TXNS + 9).to_string();
        assert_eq!(value_of(&cache, "hot").unwrap(), expected.as_bytes());
    }

    #[test]
    fn test_store_small_values_stored_inline() {
        let dir = TempDir::new().unwrap();
        let inline = StoreConfig::new(dir.path()).with_min_file_size(64);
        let cache = DiskCache::open(inline.clone()).unwrap();

        put(&cache, "small", b"tiny value");
        put(&cache, "large", &[7u8; 64]);

        assert!(cache.read_state().unwrap().index.get("small").unwrap().payload.is_inline());
        assert!(journal_text(&dir).contains(r#""inline":"#));
        let files: usize = fs::read_dir(dir.path().join(DATA_DIR))
            .unwrap()
            .map(|shard| fs::read_dir(shard.unwrap().path()).unwrap().count())
            .sum();
        assert_eq!(files, 1, "only the large value gets a file");
        drop(cache);

        let cache = DiskCache::open(inline).unwrap();
        assert_eq!(value_of(&cache, "small").unwrap(), b"tiny value");
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_size_bytes, 10 + 64);
    }

    #[test]
    fn test_store_inline_replaces_file_payload() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(config(&dir).with_min_file_size(16)).unwrap();

        put(&cache, "key1", &[1u8; 32]);
        let path = cache.entries.path_of(&payload_file(&cache, "key1"));
        assert!(path.exists());

        assert_eq!(put(&cache, "key1", b"short"), SetOutcome::Replaced);
        assert!(!path.exists());
        assert_eq!(value_of(&cache, "key1").unwrap(), b"short");
    }

    #[test]
    fn test_store_failed_append_rolls_back() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        put(&cache, "kept", b"before");
        let before = cache.stats().unwrap();

        cache.write_state().unwrap().journal.fail_next_append = true;
        assert!(matches!(
            cache.set("lost", b"after", None, Attributes::new()),
            Err(CacheError::Io(_))
        ));

        // The in-memory index is rebuilt from the journal
        assert!(cache.get("lost").unwrap().is_none());
        assert_eq!(value_of(&cache, "kept").unwrap(), b"before");
        let after = cache.stats().unwrap();
        assert_eq!(after.entry_count, before.entry_count);
        assert_eq!(after.total_size_bytes, before.total_size_bytes);
        assert!(journal_text(&dir).ends_with('\n'));

        cache.write_state().unwrap().journal.fail_next_append = true;
        assert!(cache.delete("kept").is_err());
        assert!(cache.exists("kept").unwrap());
    }

    #[test]
    fn test_store_hit_journals_access_time() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        put(&cache, "key1", b"value1");

        cache.get("key1").unwrap().unwrap();

        assert!(journal_text(&dir).contains(r#""op":"touch""#));
    }

    #[test]
    fn test_store_access_times_batched_within_window() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(
            config(&dir).with_touch_flush_interval(Duration::from_secs(3600)),
        )
        .unwrap();
        put(&cache, "key1", b"value1");

        cache.get("key1").unwrap().unwrap();
        assert!(!journal_text(&dir).contains(r#""op":"touch""#));

        cache.sweep().unwrap();
        assert!(journal_text(&dir).contains(r#""op":"touch""#));
    }

    #[test]
    fn test_store_orphan_scan_cadence() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(
            config(&dir)
                .with_orphan_grace(Duration::ZERO)
                .with_orphan_scan_interval(Duration::from_secs(3600)),
        )
        .unwrap();
        let orphan = cache.entries.write(b"never committed").unwrap();

        // The scan at open already ran
        assert_eq!(cache.sweep().unwrap().orphans, 0);
        assert!(cache.entries.read(&orphan).unwrap().is_some());

        *cache.last_orphan_scan.lock() = None;
        assert_eq!(cache.sweep().unwrap().orphans, 1);
    }

    #[test]
    fn test_store_lock_file_created() {
        let dir = TempDir::new().unwrap();
        let _cache = open(&dir);

        assert!(dir.path().join(LOCK_FILE).exists());
        assert!(dir.path().join(crate::cache::INTENT_FILE).exists());
    }
}
