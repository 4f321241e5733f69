//! Sweep Task
//!
//! Background task that periodically runs [`DiskCache::sweep`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::DiskCache;

/// Spawns a background task that sweeps the cache every `interval_secs`.
///
/// Each sweep runs on the blocking pool since it touches the disk and may
/// wait on the store lock. A failed sweep is logged and retried on the next
/// tick.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(DiskCache::open(StoreConfig::new("/tmp/cache"))?);
/// let sweep_handle = spawn_sweep_task(cache.clone(), 60);
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(cache: Arc<DiskCache>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!(interval_secs, "Starting sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let cache = cache.clone();
            match tokio::task::spawn_blocking(move || cache.sweep()).await {
                Ok(Ok(report)) => debug!(?report, "Sweep tick complete"),
                Ok(Err(err)) => warn!(error = %err, "Sweep failed"),
                Err(err) => warn!(error = %err, "Sweep task panicked"),
            }
        }
    })
}
