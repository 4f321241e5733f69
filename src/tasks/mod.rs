//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Sweep: reclaims expired entries and orphan payloads, enforces the
//!   store bounds and compacts the journal

mod sweep;

pub use sweep::spawn_sweep_task;
