//! Store Clock
//!
//! Strictly increasing nanosecond timestamps shared by every entry operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns current Unix timestamp in nanoseconds.
///
/// A system clock set before the epoch reads as zero.
pub fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Converts a duration to whole nanoseconds, saturating at `u64::MAX`.
pub fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// == Hybrid Clock ==
/// Hands out timestamps that never repeat and never go backwards.
///
/// Each call returns `max(wall clock, last issued + 1)`. Timestamps seen in
/// the journal (written by other processes) are folded in with
/// [`HybridClock::observe`], so access ordering stays consistent even when
/// workers' wall clocks drift slightly.
#[derive(Debug, Default)]
pub struct HybridClock {
    last: AtomicU64,
}

impl HybridClock {
    pub fn new() -> Self {
        Self::default()
    }

    // == Tick ==
    /// Issues a new, unique timestamp.
    pub fn tick(&self) -> u64 {
        let wall = wall_clock_ns();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(current.saturating_add(1));
            match self.last.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    // == Peek ==
    /// Reads the current time without issuing a timestamp.
    ///
    /// Used for expiration checks, which must not perturb ordering.
    pub fn peek(&self) -> u64 {
        wall_clock_ns().max(self.last.load(Ordering::Acquire))
    }

    // == Observe ==
    /// Advances the clock past a timestamp issued elsewhere.
    pub fn observe(&self, timestamp: u64) {
        self.last.fetch_max(timestamp, Ordering::AcqRel);
    }
}
