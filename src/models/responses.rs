//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing JSON bodies.

use serde::Serialize;

use crate::cache::StoreStats;

/// Response body for `PUT /cache/{*key}`
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    pub key: String,
    /// False if a live entry was replaced
    pub created: bool,
}

/// Response body for `DELETE /cache/{*key}`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub key: String,
    /// False if the key was already absent or expired
    pub removed: bool,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, removed: bool) -> Self {
        Self {
            key: key.into(),
            removed,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Entries in the index, including expired ones not yet reclaimed
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub max_entry_count: usize,
    /// Lookups served by this process since it started
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to satisfy a bound, not by TTL
    pub evictions: u64,
    /// `hits / (hits + misses)`, zero before the first lookup
    pub hit_rate: f64,
}

impl From<StoreStats> for StatsResponse {
    fn from(stats: StoreStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            entry_count: stats.entry_count,
            total_size_bytes: stats.total_size_bytes,
            max_size_bytes: stats.max_size_bytes,
            max_entry_count: stats.max_entry_count,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
        }
    }
}

/// Response body for `GET /keys`
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<String>,
}

/// Response body for `POST /flush`
#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    /// Entries removed
    pub removed: usize,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
