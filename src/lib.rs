//! Diskcache Server - A persistent disk-backed cache server
//!
//! Stores values as files under a directory shared by any number of worker
//! processes, with TTL expiration, size- and count-bounded eviction, and an
//! HTTP interface.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::DiskCache;
pub use config::{Config, StoreConfig};
pub use error::{CacheError, Result};
pub use tasks::spawn_sweep_task;
