//! Request DTOs for the cache server API
//!
//! Payloads travel as raw bodies; only query strings are modelled here.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Default number of keys returned by `GET /keys`
pub const DEFAULT_KEYS_LIMIT: usize = 100;

/// Query string for `PUT /cache/{*key}`
///
/// `ttl` is in seconds; fractions are allowed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtlQuery {
    #[serde(default)]
    pub ttl: Option<f64>,
}

impl TtlQuery {
    /// Converts the query TTL, rejecting negative or non-finite values.
    pub fn duration(&self) -> Result<Option<Duration>> {
        self.ttl.map(parse_ttl_secs).transpose()
    }
}

/// Converts a TTL in (possibly fractional) seconds to a Duration.
pub fn parse_ttl_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| CacheError::InvalidRequest(format!("Invalid TTL: {}", secs)))
}

/// Query string for `GET /keys`
#[derive(Debug, Clone, Deserialize)]
pub struct KeysQuery {
    #[serde(default = "default_keys_limit")]
    pub limit: usize,
}

fn default_keys_limit() -> usize {
    DEFAULT_KEYS_LIMIT
}
