//! Index Journal
//!
//! The durable half of the index: an append-only file of newline-delimited
//! JSON. The first line is a [`Header`]; every later line is one committed
//! [`Txn`]. A transaction is committed once its full line, newline included,
//! has been flushed. A trailing line without a newline is an interrupted
//! append and is never applied.
//!
//! Several processes share the journal. Each keeps a read offset and
//! catches up on lines appended by the others before every operation.
//! Compaction rewrites the file under a new generation, which tells the
//! other processes to reload from the start.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::clock::wall_clock_ns;
use crate::cache::entry_store::sync_dir;
use crate::cache::IndexEntry;
use crate::error::{CacheError, Result};

/// On-disk format version written to the header.
pub const JOURNAL_VERSION: u32 = 1;

// == Records ==
/// One index mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Insert or replace the entry for `key`
    Put { key: String, entry: IndexEntry },
    /// Remove `key` if its entry still has insertion number `seq`
    Remove { key: String, seq: u64 },
    /// Record a read of `key` at `at` if its entry still has `seq`
    Touch { key: String, seq: u64, at: u64 },
    /// Remove every entry
    Clear,
}

/// A committed group of operations, applied all or nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txn {
    pub txn: u64,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    version: u32,
    generation: String,
    /// Lowest insertion number not yet issued when the file was written
    next_seq: u64,
}

/// Transactions found by [`Journal::catch_up`].
#[derive(Debug)]
pub enum CatchUp {
    /// The file was rewritten or is being read for the first time; the
    /// caller must rebuild its index from these transactions alone
    Reload { seq_floor: u64, txns: Vec<Txn> },
    /// Transactions appended since the previous catch-up
    Append(Vec<Txn>),
}

/// Identity of the journal file at the last read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
    inode: u64,
}

// == Journal ==
/// Reader/appender for the index journal file.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    generation: String,
    /// Byte offset just past the last complete line read or written
    offset: u64,
    next_txn: u64,
    /// Lines after the header in the current generation
    txn_count: u64,
    fingerprint: Option<Fingerprint>,
    /// Makes the next append write half its line and then fail
    #[cfg(test)]
    pub(crate) fail_next_append: bool,
}

impl Journal {
    // == Constructor ==
    /// Creates a reader for the journal at `path`. Nothing is read until the
    /// first [`catch_up`](Self::catch_up), which always reloads.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generation: String::new(),
            offset: 0,
            next_txn: 1,
            txn_count: 0,
            fingerprint: None,
            #[cfg(test)]
            fail_next_append: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed transactions in the current generation.
    pub fn txn_count(&self) -> u64 {
        self.txn_count
    }

    // == Ensure Exists ==
    /// Creates an empty journal if none exists. Caller holds the exclusive
    /// store lock. Returns true if a new file was written.
    pub fn ensure_exists(&mut self) -> Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() > 0 => Ok(false),
            Ok(_) => {
                self.rewrite(0, Vec::new())?;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.rewrite(0, Vec::new())?;
                Ok(true)
            }
            Err(err) => Err(err.into()),
        }
    }

    // == Is Current ==
    /// Returns true if the file is unchanged since it was last read or
    /// written by this instance, so catching up would find nothing.
    pub fn is_current(&self) -> bool {
        match self.fingerprint {
            Some(known) => fingerprint(&self.path) == Some(known),
            None => false,
        }
    }

    /// Forgets the read position; the next catch-up reloads everything.
    pub fn invalidate(&mut self) {
        self.generation.clear();
        self.offset = 0;
        self.fingerprint = None;
    }

    // == Catch Up ==
    /// Reads transactions committed since the last call.
    ///
    /// With `repair` set (exclusive store lock held) an interrupted trailing
    /// append is truncated away and an unreadable header is moved aside.
    /// Without it both are left for the next writer.
    pub fn catch_up(&mut self, repair: bool) -> Result<CatchUp> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if repair && err.kind() == io::ErrorKind::NotFound => {
                warn!(journal = ?self.path, "Journal missing, starting empty");
                self.rewrite(0, Vec::new())?;
                return Ok(CatchUp::Reload {
                    seq_floor: 0,
                    txns: Vec::new(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header_line = Vec::new();
        reader.read_until(b'\n', &mut header_line)?;
        let header = match parse_header(&header_line) {
            Ok(header) => header,
            Err(err @ CacheError::StoreCorruption(_)) if repair => {
                self.quarantine(&err)?;
                return Ok(CatchUp::Reload {
                    seq_floor: 0,
                    txns: Vec::new(),
                });
            }
            Err(err) => return Err(err),
        };

        let reload = header.generation != self.generation || len < self.offset;
        let start = if reload {
            header_line.len() as u64
        } else {
            self.offset
        };
        reader.seek(SeekFrom::Start(start))?;
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail)?;

        let mut txns = Vec::new();
        let mut consumed = 0usize;
        let mut lines = 0u64;
        for line in tail.split_inclusive(|byte| *byte == b'\n') {
            if line.last() != Some(&b'\n') {
                break;
            }
            consumed += line.len();
            lines += 1;
            match serde_json::from_slice::<Txn>(&line[..line.len() - 1]) {
                Ok(txn) => {
                    self.next_txn = self.next_txn.max(txn.txn + 1);
                    txns.push(txn);
                }
                Err(err) => warn!(
                    journal = ?self.path,
                    offset = start + (consumed - line.len()) as u64,
                    error = %err,
                    "Skipping corrupt journal transaction"
                ),
            }
        }

        let end = start + consumed as u64;
        if consumed < tail.len() && repair {
            warn!(
                journal = ?self.path,
                offset = end,
                discarded = tail.len() - consumed,
                "Truncating interrupted journal append"
            );
            let file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(end)?;
            file.sync_all()?;
        }

        self.generation = header.generation;
        self.offset = end;
        self.fingerprint = fingerprint(&self.path);

        if reload {
            self.txn_count = lines;
            Ok(CatchUp::Reload {
                seq_floor: header.next_seq,
                txns,
            })
        } else {
            self.txn_count += lines;
            Ok(CatchUp::Append(txns))
        }
    }

    // == Append ==
    /// Durably appends one transaction. Caller holds the exclusive store
    /// lock and has caught up with `repair` set.
    pub fn append(&mut self, ops: Vec<Op>) -> Result<u64> {
        let txn = Txn {
            txn: self.next_txn,
            ops,
        };
        let mut line = serde_json::to_vec(&txn)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        if let Err(err) = self.write_line(&mut file, &line) {
            // Drop whatever part of the line made it out, then force a full
            // reload so the caller's in-memory changes are discarded
            let _ = file.set_len(self.offset);
            self.invalidate();
            return Err(err.into());
        }

        self.next_txn += 1;
        self.offset += line.len() as u64;
        self.txn_count += 1;
        self.fingerprint = fingerprint(&self.path);
        Ok(txn.txn)
    }

    fn write_line(&mut self, file: &mut File, line: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_append) {
            file.write_all(&line[..line.len() / 2])?;
            return Err(io::Error::other("injected append failure"));
        }
        file.write_all(line)?;
        file.sync_data()
    }

    // == Compaction ==
    /// Returns true once the journal holds enough superseded records to be
    /// worth rewriting.
    pub fn needs_compaction(&self, live_entries: usize, min_txns: u64) -> bool {
        self.txn_count > min_txns.max(2 * live_entries as u64)
    }

    /// Replaces the journal with a single snapshot transaction under a new
    /// generation. Caller holds the exclusive store lock.
    pub fn compact(&mut self, next_seq: u64, snapshot: Vec<Op>) -> Result<()> {
        let before = self.txn_count;
        self.rewrite(next_seq, snapshot)?;
        info!(
            journal = ?self.path,
            txns_before = before,
            generation = %self.generation,
            "Journal compacted"
        );
        Ok(())
    }

    fn rewrite(&mut self, next_seq: u64, snapshot: Vec<Op>) -> Result<()> {
        let header = Header {
            version: JOURNAL_VERSION,
            generation: Uuid::new_v4().simple().to_string(),
            next_seq,
        };
        let mut contents = serde_json::to_vec(&header)?;
        contents.push(b'\n');

        let mut txn_count = 0;
        if !snapshot.is_empty() {
            let txn = Txn {
                txn: self.next_txn,
                ops: snapshot,
            };
            contents.extend(serde_json::to_vec(&txn)?);
            contents.push(b'\n');
            self.next_txn += 1;
            txn_count = 1;
        }

        let temp_path = self.path.with_extension("tmp");
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&contents)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, &self.path)?;
            match self.path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => sync_dir(parent),
                _ => Ok(()),
            }
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }

        self.generation = header.generation;
        self.offset = contents.len() as u64;
        self.txn_count = txn_count;
        self.fingerprint = fingerprint(&self.path);
        Ok(())
    }

    /// Moves an unreadable journal aside and starts a fresh one. The
    /// payloads it referenced become orphans and are reclaimed later.
    fn quarantine(&mut self, cause: &CacheError) -> Result<()> {
        let aside = self
            .path
            .with_extension(format!("corrupt-{}", wall_clock_ns() / 1_000_000));
        error!(
            journal = ?self.path,
            moved_to = ?aside,
            error = %cause,
            "Journal header unreadable, starting an empty index"
        );
        fs::rename(&self.path, &aside)?;
        self.rewrite(0, Vec::new())
    }
}

fn parse_header(line: &[u8]) -> Result<Header> {
    if line.last() != Some(&b'\n') {
        return Err(CacheError::StoreCorruption(
            "journal header is incomplete".to_string(),
        ));
    }
    let header: Header = serde_json::from_slice(&line[..line.len() - 1])
        .map_err(|err| CacheError::StoreCorruption(format!("journal header: {}", err)))?;
    if header.version != JOURNAL_VERSION {
        return Err(CacheError::Internal(format!(
            "unsupported journal version {} (expected {})",
            header.version, JOURNAL_VERSION
        )));
    }
    Ok(header)
}

#[cfg(unix)]
fn inode(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &fs::Metadata) -> u64 {
    0
}

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = fs::metadata(path).ok()?;
    Some(Fingerprint {
        len: meta.len(),
        modified: meta.modified().ok(),
        inode: inode(&meta),
    })
}
