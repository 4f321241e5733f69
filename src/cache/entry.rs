//! Cache Entry Module
//!
//! Defines index entries and the values handed back to callers.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::clock::duration_ns;

/// Opaque caller metadata stored next to a value (content type and the like).
pub type Attributes = BTreeMap<String, String>;

// == Entry Ref ==
/// Where a payload's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// Path relative to the store's data directory
    File(String),
    /// Small payloads travel in the journal record itself, hex encoded
    Inline(#[serde(with = "hex_bytes")] Vec<u8>),
}

/// Location and fingerprint of a payload in the entry store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRef {
    #[serde(flatten)]
    pub location: Location,
    /// Payload length in bytes
    pub size_bytes: u64,
    /// SHA-256 of the payload, hex encoded
    pub digest: String,
}

impl EntryRef {
    /// Payload file name, None for inline payloads.
    pub fn file(&self) -> Option<&str> {
        match &self.location {
            Location::File(file) => Some(file),
            Location::Inline(_) => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.location, Location::Inline(_))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

// == Index Entry ==
/// Metadata for one committed cache entry.
///
/// All timestamps are nanoseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Insertion order, unique across the store's lifetime
    pub seq: u64,
    /// Payload location
    #[serde(flatten)]
    pub payload: EntryRef,
    /// Creation timestamp
    pub created_at: u64,
    /// Expiration timestamp, None = no expiration
    pub expires_at: Option<u64>,
    /// Last read (or write) timestamp
    pub last_accessed_at: u64,
    /// Caller metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl IndexEntry {
    // == Constructor ==
    /// Creates an index entry for a freshly written payload.
    pub fn new(
        seq: u64,
        payload: EntryRef,
        created_at: u64,
        ttl: Option<Duration>,
        attributes: Attributes,
    ) -> Self {
        let expires_at = ttl.map(|ttl| created_at.saturating_add(duration_ns(ttl)));

        Self {
            seq,
            payload,
            created_at,
            expires_at,
            last_accessed_at: created_at,
            attributes,
        }
    }

    /// Payload size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.payload.size_bytes
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry is expired once `now` reaches its expiration time, so an
    /// entry whose TTL has fully elapsed is never served.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }
}

// == Cached Value ==
/// A hit returned by [`DiskCache::get`](crate::cache::DiskCache::get).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub data: Vec<u8>,
    /// SHA-256 of `data`, hex encoded
    pub digest: String,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub attributes: Attributes,
}

// == Operation Outcomes ==
/// Result of a successful `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// No live entry existed for the key
    Created,
    /// A live entry was replaced
    Replaced,
}

/// Result of a `delete`. Both variants are successful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    AlreadyAbsent,
}
