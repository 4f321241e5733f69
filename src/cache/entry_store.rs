//! Entry Store Module
//!
//! Holds payload bytes, one file per entry, under `<store>/data/`. Values
//! smaller than the configured minimum file size skip the disk and travel
//! inline in the journal record instead.
//!
//! Files are written to a temporary sibling, flushed, renamed into place and
//! the parent directory flushed, so a returned [`EntryRef`] always points at a
//! complete, durable payload. Nothing here knows about keys: a payload only
//! becomes an entry once the journal commits an index record naming it.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{EntryRef, Location};
use crate::error::{CacheError, Result};

const PAYLOAD_EXTENSION: &str = "val";
const TEMP_EXTENSION: &str = "tmp";

// == Entry Store ==
/// File-per-entry payload storage.
#[derive(Debug)]
pub struct EntryStore {
    /// Root of the payload tree
    data_dir: PathBuf,
    /// Largest payload accepted by `write`
    max_value_size: u64,
    /// Payloads below this size are kept inline
    min_file_size: u64,
}

impl EntryStore {
    // == Constructor ==
    /// Opens (creating if needed) the payload tree under `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>, max_value_size: u64, min_file_size: u64) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            max_value_size,
            min_file_size,
        })
    }

    /// Rejects payloads larger than the configured maximum.
    pub fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_value_size {
            return Err(CacheError::ValueTooLarge {
                size,
                limit: self.max_value_size,
            });
        }
        Ok(())
    }

    // == Write ==
    /// Durably writes a payload and returns its reference. Small payloads
    /// are returned inline and become durable with the journal record.
    pub fn write(&self, value: &[u8]) -> Result<EntryRef> {
        let size_bytes = value.len() as u64;
        self.check_size(size_bytes)?;
        if size_bytes < self.min_file_size {
            return Ok(EntryRef {
                location: Location::Inline(value.to_vec()),
                size_bytes,
                digest: digest_hex(value),
            });
        }

        let id = Uuid::new_v4().simple().to_string();
        let file = format!("{}/{}.{}", &id[..2], id, PAYLOAD_EXTENSION);
        let path = self.data_dir.join(&file);
        let parent = self.data_dir.join(&id[..2]);
        fs::create_dir_all(&parent)?;

        let temp_path = path.with_extension(TEMP_EXTENSION);
        if let Err(err) = write_durably(&temp_path, &path, &parent, value) {
            // Clean up the partial file; the final path was never published
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }

        debug!(file = %file, size_bytes, "Payload written");
        Ok(EntryRef {
            location: Location::File(file),
            size_bytes,
            digest: digest_hex(value),
        })
    }

    // == Read ==
    /// Reads a payload, verifying its length and digest.
    ///
    /// Returns `Ok(None)` if the file does not exist and
    /// [`CacheError::StoreCorruption`] if its contents do not match `entry`.
    pub fn read(&self, entry: &EntryRef) -> Result<Option<Vec<u8>>> {
        let (data, source) = match &entry.location {
            Location::Inline(data) => (data.clone(), "inline payload"),
            Location::File(file) => match fs::read(self.path_of(file)) {
                Ok(data) => (data, file.as_str()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            },
        };

        if data.len() as u64 != entry.size_bytes {
            return Err(CacheError::StoreCorruption(format!(
                "{}: expected {} bytes, found {}",
                source,
                entry.size_bytes,
                data.len()
            )));
        }
        if digest_hex(&data) != entry.digest {
            return Err(CacheError::StoreCorruption(format!(
                "{}: digest mismatch",
                source
            )));
        }

        Ok(Some(data))
    }

    // == Remove ==
    /// Deletes a payload file. Returns false if it was already gone or the
    /// payload is inline.
    pub fn remove(&self, entry: &EntryRef) -> Result<bool> {
        let Some(file) = entry.file() else {
            return Ok(false);
        };
        match fs::remove_file(self.path_of(file)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes payloads that were superseded by a committed transaction.
    ///
    /// Failures are logged and left for the orphan reclaimer.
    pub fn remove_superseded<'a>(&self, entries: impl IntoIterator<Item = &'a EntryRef>) {
        for entry in entries {
            if let Err(err) = self.remove(entry) {
                warn!(file = ?entry.file(), error = %err, "Failed to remove superseded payload");
            }
        }
    }

    // == Reclaim Orphans ==
    /// Deletes payload and temp files that no index entry references.
    ///
    /// Only files last modified more than `grace` ago are touched, so
    /// payloads written by a worker that has not committed yet survive.
    pub fn reclaim_orphans(&self, live: &HashSet<String>, grace: Duration) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(grace)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for shard in fs::read_dir(&self.data_dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let shard_name = shard.file_name().to_string_lossy().into_owned();

            for file in fs::read_dir(shard.path())? {
                let file = file?;
                let relative = format!("{}/{}", shard_name, file.file_name().to_string_lossy());
                if live.contains(relative.as_str()) {
                    continue;
                }

                let modified = match file.metadata().and_then(|meta| meta.modified()) {
                    Ok(modified) => modified,
                    Err(err) => {
                        warn!(file = %relative, error = %err, "Cannot stat payload candidate");
                        continue;
                    }
                };
                if modified > cutoff {
                    continue;
                }

                match fs::remove_file(file.path()) {
                    Ok(()) => {
                        debug!(file = %relative, "Reclaimed orphan payload");
                        removed += 1;
                    }
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => warn!(file = %relative, error = %err, "Failed to reclaim orphan"),
                }
            }
        }

        Ok(removed)
    }

    /// Absolute path of a payload file.
    pub fn path_of(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }
}

// == Utility Functions ==
/// SHA-256 of `data`, hex encoded.
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn write_durably(temp_path: &Path, path: &Path, parent: &Path, value: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)?;
    file.write_all(value)?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp_path, path)?;
    sync_dir(parent)
}

/// Flushes a directory so renames and unlinks inside it survive a crash.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
