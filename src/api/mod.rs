//! API Module
//!
//! HTTP handlers and routing for the cache server.
//!
//! # Endpoints
//! - `GET /cache/*key` - Retrieve a raw value
//! - `HEAD /cache/*key` - Check whether a key exists
//! - `PUT /cache/*key` - Store the request body
//! - `DELETE /cache/*key` - Delete a key
//! - `GET /stats` - Store size, bounds and counters
//! - `GET /keys` - Live keys in insertion order
//! - `POST /flush` - Remove every entry
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
