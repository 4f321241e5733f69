//! Lock Coordinator
//!
//! Two layers of locking with bounded waits:
//!
//! - [`KeyLocks`]: per-key mutual exclusion for mutators, created on demand
//!   and dropped from the table when the last holder or waiter leaves.
//! - [`StoreLock`]: a reader/writer lock over the whole store that spans
//!   processes. An in-process `RwLock` orders threads, and an advisory lock
//!   on `<store>/LOCK` orders processes. Advisory locks belong to the open
//!   file, so the in-process layer must be taken first and shared file holds
//!   are reference counted across reader threads. A second file,
//!   `<store>/LOCK.intent`, keeps busy readers in one process from starving
//!   writers in another.
//!
//! Every acquisition gives up after the configured timeout with
//! [`CacheError::Timeout`].

use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::cache::{INTENT_FILE, LOCK_FILE};
use crate::error::{CacheError, Result};

const MAX_BACKOFF: Duration = Duration::from_millis(50);

// == Key Locks ==
#[derive(Debug, Default)]
struct KeySlot {
    held: Mutex<bool>,
    released: Condvar,
}

/// Table of per-key locks.
#[derive(Debug)]
pub struct KeyLocks {
    table: Mutex<HashMap<String, Arc<KeySlot>>>,
    timeout: Duration,
}

/// Holds one key's lock until dropped.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    slot: Arc<KeySlot>,
}

impl KeyLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    // == Lock ==
    /// Acquires the lock for `key`, waiting at most the configured timeout.
    pub fn lock(&self, key: &str) -> Result<KeyGuard<'_>> {
        let slot = {
            let mut table = self.table.lock();
            Arc::clone(table.entry(key.to_string()).or_default())
        };

        let deadline = Instant::now() + self.timeout;
        let mut held = slot.held.lock();
        while *held {
            if slot.released.wait_until(&mut held, deadline).timed_out() && *held {
                drop(held);
                self.discard(key, &slot);
                return Err(CacheError::Timeout(format!("lock on key '{}'", key)));
            }
        }
        *held = true;
        drop(held);

        Ok(KeyGuard {
            locks: self,
            key: key.to_string(),
            slot,
        })
    }

    /// Number of keys with a holder or waiter.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the slot once the caller's handle is the only one left
    /// besides the table's own.
    fn discard(&self, key: &str, slot: &Arc<KeySlot>) {
        let mut table = self.table.lock();
        if Arc::strong_count(slot) == 2 {
            table.remove(key);
        }
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        *self.slot.held.lock() = false;
        self.slot.released.notify_one();
        self.locks.discard(&self.key, &self.slot);
    }
}

// == Store Lock ==
#[derive(Debug, Clone, Copy)]
enum FileMode {
    Shared,
    Exclusive,
}

/// Store-wide reader/writer lock shared between threads and processes.
///
/// A writer announces itself by holding `LOCK.intent` exclusively while it
/// waits for `LOCK`. Readers check the intent file before taking or joining
/// a shared hold, so the shared hold drains and the writer gets in.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    intent: File,
    gate: RwLock<()>,
    shared_holders: Mutex<usize>,
    timeout: Duration,
}

/// Shared hold on the store; readers may overlap.
#[derive(Debug)]
pub struct SharedGuard<'a> {
    lock: &'a StoreLock,
    _gate: RwLockReadGuard<'a, ()>,
}

/// Exclusive hold on the store for a commit section.
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    lock: &'a StoreLock,
    _gate: RwLockWriteGuard<'a, ()>,
}

impl StoreLock {
    // == Constructor ==
    /// Opens (creating if needed) the lock files inside `dir`.
    pub fn open(dir: &Path, timeout: Duration) -> Result<Self> {
        Ok(Self {
            file: open_lock_file(&dir.join(LOCK_FILE))?,
            intent: open_lock_file(&dir.join(INTENT_FILE))?,
            gate: RwLock::new(()),
            shared_holders: Mutex::new(0),
            timeout,
        })
    }

    // == Shared ==
    /// Acquires a shared hold, yielding to writers waiting in any process.
    pub fn shared(&self) -> Result<SharedGuard<'_>> {
        let deadline = Instant::now() + self.timeout;
        let timeout = || CacheError::Timeout("shared store lock".to_string());
        let gate = self.gate.try_read_until(deadline).ok_or_else(timeout)?;

        let mut backoff = Duration::from_millis(1);
        loop {
            let mut holders = self
                .shared_holders
                .try_lock_until(deadline)
                .ok_or_else(timeout)?;
            if !self.writer_waiting()? {
                if *holders == 0 {
                    acquire(&self.file, FileMode::Shared, deadline)?;
                }
                *holders += 1;
                break;
            }
            drop(holders);

            let now = Instant::now();
            if now >= deadline {
                return Err(timeout());
            }
            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        Ok(SharedGuard {
            lock: self,
            _gate: gate,
        })
    }

    // == Exclusive ==
    /// Acquires an exclusive hold.
    pub fn exclusive(&self) -> Result<ExclusiveGuard<'_>> {
        let deadline = Instant::now() + self.timeout;
        let gate = self
            .gate
            .try_write_until(deadline)
            .ok_or_else(|| CacheError::Timeout("exclusive store lock".to_string()))?;

        acquire(&self.intent, FileMode::Exclusive, deadline)?;
        let acquired = acquire(&self.file, FileMode::Exclusive, deadline);
        release(&self.intent);
        acquired?;

        Ok(ExclusiveGuard {
            lock: self,
            _gate: gate,
        })
    }

    /// True while a writer in some process holds the intent lock. Called with
    /// `shared_holders` locked, which serializes use of the intent handle.
    fn writer_waiting(&self) -> Result<bool> {
        match self.intent.try_lock_shared() {
            Ok(()) => {
                release(&self.intent);
                Ok(false)
            }
            Err(TryLockError::WouldBlock) => Ok(true),
            Err(TryLockError::Error(err)) => Err(err.into()),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Polls an advisory lock with exponential backoff until `deadline`.
fn acquire(file: &File, mode: FileMode, deadline: Instant) -> Result<()> {
    let mut backoff = Duration::from_millis(1);
    loop {
        let attempt = match mode {
            FileMode::Shared => file.try_lock_shared(),
            FileMode::Exclusive => file.try_lock(),
        };
        match attempt {
            Ok(()) => return Ok(()),
            Err(TryLockError::WouldBlock) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CacheError::Timeout(format!("{:?} store file lock", mode)));
                }
                thread::sleep(backoff.min(deadline - now));
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(TryLockError::Error(err)) => return Err(err.into()),
        }
    }
}

fn release(file: &File) {
    if let Err(err) = file.unlock() {
        warn!(error = %err, "Failed to release store file lock");
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        let mut holders = self.lock.shared_holders.lock();
        *holders -= 1;
        if *holders == 0 {
            release(&self.lock.file);
        }
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        release(&self.lock.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_key_lock_released_on_drop() {
        let locks = KeyLocks::new(Duration::from_millis(100));

        {
            let _guard = locks.lock("a").unwrap();
            assert_eq!(locks.len(), 1);
        }

        assert!(locks.is_empty());
        let _again = locks.lock("a").unwrap();
    }

    #[test]
    fn test_key_lock_times_out() {
        let locks = KeyLocks::new(Duration::from_millis(20));
        let _held = locks.lock("busy").unwrap();

        let started = Instant::now();
        let result = locks.lock("busy");

        assert!(matches!(result, Err(CacheError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(20));
        // The timed out waiter does not leak a slot
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_contend() {
        let locks = KeyLocks::new(Duration::from_millis(10));
        let _a = locks.lock("a").unwrap();
        let _b = locks.lock("b").unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_key_lock_mutual_exclusion() {
        let locks = Arc::new(KeyLocks::new(Duration::from_secs(5)));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _guard = locks.lock("shared").unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn test_readers_share_store_lock() {
        let dir = TempDir::new().unwrap();
        let lock = StoreLock::open(dir.path(), Duration::from_millis(50)).unwrap();

        let first = lock.shared().unwrap();
        let second = lock.shared().unwrap();

        assert!(matches!(lock.exclusive(), Err(CacheError::Timeout(_))));
        drop(first);
        drop(second);
        let _writer = lock.exclusive().unwrap();
    }

    #[test]
    fn test_exclusive_lock_excludes_other_handle() {
        let dir = TempDir::new().unwrap();
        // Two handles stand in for two worker processes
        let worker_a = StoreLock::open(dir.path(), Duration::from_millis(30)).unwrap();
        let worker_b = StoreLock::open(dir.path(), Duration::from_millis(30)).unwrap();

        let held = worker_a.exclusive().unwrap();
        assert!(matches!(worker_b.shared(), Err(CacheError::Timeout(_))));
        assert!(matches!(worker_b.exclusive(), Err(CacheError::Timeout(_))));

        drop(held);
        let _shared_a = worker_a.shared().unwrap();
        let _shared_b = worker_b.shared().unwrap();
        assert!(matches!(worker_a.exclusive(), Err(CacheError::Timeout(_))));
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers_elsewhere() {
        let dir = TempDir::new().unwrap();
        let readers = StoreLock::open(dir.path(), Duration::from_millis(40)).unwrap();
        let writer = Arc::new(StoreLock::open(dir.path(), Duration::from_secs(5)).unwrap());

        let held = readers.shared().unwrap();
        let waiting = {
            let writer = Arc::clone(&writer);
            thread::spawn(move || writer.exclusive().map(drop))
        };
        while !readers.writer_waiting().unwrap() {
            thread::sleep(Duration::from_millis(1));
        }

        // A reader arriving now must not join the existing shared hold
        assert!(matches!(readers.shared(), Err(CacheError::Timeout(_))));

        drop(held);
        waiting.join().unwrap().unwrap();
        let _after = readers.shared().unwrap();
    }
}
