//! Error types for the cache server
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache engine and server.
///
/// A cache miss and deleting an absent key are not errors; the engine
/// reports those as values. `NotFound` only exists so the HTTP layer can
/// turn a miss into a 404.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data (malformed key, bad TTL, length mismatch)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Value exceeds the per-value limit or the whole store budget
    #[error("Value of {size} bytes exceeds limit of {limit} bytes")]
    ValueTooLarge { size: u64, limit: u64 },

    /// A lock could not be acquired within the configured timeout
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// A stored record failed validation
    #[error("Store corruption: {0}")]
    StoreCorruption(String),

    /// Disk unavailable or a filesystem operation failed
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A journal record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns true if the caller may safely retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Timeout(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::ValueTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CacheError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::StoreCorruption(_)
            | CacheError::Io(_)
            | CacheError::Serialization(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        if self.is_retryable() {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache server.
pub type Result<T> = std::result::Result<T, CacheError>;
