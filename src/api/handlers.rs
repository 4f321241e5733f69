//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.
//!
//! Engine calls block on disk and locks, so every handler runs them on the
//! blocking pool. A dropped request cannot interrupt an engine call halfway.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cache::{Attributes, CachedValue, DeleteOutcome, DiskCache, SetOutcome};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::requests::parse_ttl_secs;
use crate::models::{
    DeleteResponse, FlushResponse, HealthResponse, KeysQuery, KeysResponse, SetResponse,
    StatsResponse, TtlQuery,
};

/// Request header carrying a TTL in seconds
pub const EXPIRE_HEADER: &str = "x-diskcache-expire";

/// Request header whose value is served back as `Cache-Control`
pub const SET_CACHE_CONTROL_HEADER: &str = "x-set-cache-control";

/// Request headers stored with an entry, keyed by the name replayed on reads.
/// A plain `Cache-Control` on the PUT describes that request, not the value.
const STORED_HEADERS: [(&str, HeaderName); 3] = [
    ("content-type", header::CONTENT_TYPE),
    ("content-encoding", header::CONTENT_ENCODING),
    (SET_CACHE_CONTROL_HEADER, header::CACHE_CONTROL),
];

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DiskCache>,
}

impl AppState {
    /// Creates a new AppState around an open cache.
    pub fn new(cache: DiskCache) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Opens the store named by the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(DiskCache::open(config.store_config())?))
    }

    /// Runs an engine call on the blocking pool.
    async fn run<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&DiskCache) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || call(&cache))
            .await
            .map_err(|err| CacheError::Internal(format!("Cache task failed: {}", err)))?
    }
}

/// Handler for GET /cache/{*key}
///
/// Returns the raw value with its ETag, `Last-Modified`, expiry and stored
/// headers, or 304 when `If-None-Match` already names the current value.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let lookup = key.clone();
    let value = state
        .run(move |cache| cache.get(&lookup))
        .await?
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    let etag = format!("\"{}\"", value.digest);
    if if_none_match(&headers, &etag) {
        debug!(key = %key, "Not modified");
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    let mut response_headers = entry_headers(&value);
    insert_header(&mut response_headers, header::ETAG, &etag);
    Ok((StatusCode::OK, response_headers, value.data).into_response())
}

/// Handler for HEAD /cache/{*key}
pub async fn head_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    let exists = state.run(move |cache| cache.exists(&key)).await?;
    Ok(if exists {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

/// Handler for PUT /cache/{*key}
///
/// Stores the request body. TTL comes from `?ttl=` or the `x-diskcache-expire`
/// header, the query taking precedence. Responds 201 for a new entry and 200
/// when a live entry was replaced.
pub async fn set_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<TtlQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<SetResponse>)> {
    let ttl = match query.duration()? {
        Some(ttl) => Some(ttl),
        None => header_ttl(&headers)?,
    };
    let limit = state.cache.config().max_value_size;
    let declared = content_length(&headers)?;
    if let Some(size) = declared {
        if size > limit {
            return Err(CacheError::ValueTooLarge { size, limit });
        }
    }

    let data = to_bytes(body, usize::try_from(limit).unwrap_or(usize::MAX))
        .await
        .map_err(|err| match declared {
            // Streamed body ran past the limit
            None => CacheError::ValueTooLarge {
                size: limit.saturating_add(1),
                limit,
            },
            Some(_) => CacheError::InvalidRequest(format!("Failed to read request body: {}", err)),
        })?;
    if let Some(size) = declared {
        if size != data.len() as u64 {
            return Err(CacheError::InvalidRequest(format!(
                "Content-Length {} does not match body length {}",
                size,
                data.len()
            )));
        }
    }

    let attributes = stored_attributes(&headers);
    let stored = key.clone();
    let outcome = state
        .run(move |cache| cache.set(&stored, &data, ttl, attributes))
        .await?;

    let created = outcome == SetOutcome::Created;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(SetResponse { key, created })))
}

/// Handler for DELETE /cache/{*key}
///
/// Always 200; `removed` tells whether a live entry was deleted.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let target = key.clone();
    let outcome = state.run(move |cache| cache.delete(&target)).await?;
    Ok(Json(DeleteResponse::new(
        key,
        outcome == DeleteOutcome::Removed,
    )))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let stats = state.run(|cache| cache.stats()).await?;
    Ok(Json(StatsResponse::from(stats)))
}

/// Handler for GET /keys
pub async fn keys_handler(
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeysResponse>> {
    let keys = state.run(move |cache| cache.keys(query.limit)).await?;
    Ok(Json(KeysResponse { keys }))
}

/// Handler for POST /flush
pub async fn flush_handler(State(state): State<AppState>) -> Result<Json<FlushResponse>> {
    let removed = state.run(|cache| cache.clear()).await?;
    Ok(Json(FlushResponse { removed }))
}

/// Handler for GET /health
///
/// Liveness only; does not touch the store.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

// == Header Helpers ==
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|tag| tag.trim())
        .any(|tag| tag == "*" || tag.trim_start_matches("W/") == etag)
}

fn header_ttl(headers: &HeaderMap) -> Result<Option<Duration>> {
    let Some(raw) = headers.get(EXPIRE_HEADER) else {
        return Ok(None);
    };
    let secs = raw
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .ok_or_else(|| CacheError::InvalidRequest(format!("Invalid {} header", EXPIRE_HEADER)))?;
    parse_ttl_secs(secs).map(Some)
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>> {
    headers
        .get(header::CONTENT_LENGTH)
        .map(|raw| {
            raw.to_str()
                .ok()
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .ok_or_else(|| CacheError::InvalidRequest("Invalid Content-Length".to_string()))
        })
        .transpose()
}

fn stored_attributes(headers: &HeaderMap) -> Attributes {
    STORED_HEADERS
        .iter()
        .filter_map(|(request, stored)| {
            let value = headers.get(*request)?.to_str().ok()?;
            Some((stored.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn entry_headers(value: &CachedValue) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, stored) in &value.attributes {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            insert_header(&mut headers, name, stored);
        }
    }
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
    }
    if let Some(modified) = http_date(value.created_at) {
        insert_header(&mut headers, header::LAST_MODIFIED, &modified);
    }
    if let Some(expires) = value.expires_at.and_then(http_date) {
        insert_header(&mut headers, header::EXPIRES, &expires);
    }
    headers
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Formats a nanosecond timestamp as an HTTP date.
fn http_date(timestamp_ns: u64) -> Option<String> {
    let secs = i64::try_from(timestamp_ns / 1_000_000_000).ok()?;
    let nanos = (timestamp_ns % 1_000_000_000) as u32;
    let time: DateTime<Utc> = DateTime::from_timestamp(secs, nanos)?;
    Some(time.format(HTTP_DATE_FORMAT).to_string())
}
