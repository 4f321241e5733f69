//! Request and Response models for the cache server API
//!
//! This module defines the DTOs (Data Transfer Objects) used for query
//! strings and the JSON bodies of non-payload endpoints.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{KeysQuery, TtlQuery};
pub use responses::{
    DeleteResponse, ErrorResponse, FlushResponse, HealthResponse, KeysResponse, SetResponse,
    StatsResponse,
};
