//! Diskcache Server - A persistent disk-backed cache server
//!
//! Binary entry point: loads configuration, opens the store, starts the
//! sweep task and serves HTTP until SIGINT/SIGTERM.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use diskcache_server::api::{create_router, AppState};
use diskcache_server::{spawn_sweep_task, Config};

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Open the store, recovering from any earlier crash
/// 4. Start background sweep task
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diskcache_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Diskcache Server");

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    info!(
        store_dir = ?config.store_dir,
        max_size_bytes = config.max_size_bytes,
        max_entries = config.max_entries,
        default_ttl = config.default_ttl,
        eviction_policy = %config.eviction_policy,
        port = config.server_port,
        sweep_interval = config.sweep_interval,
        "Configuration loaded"
    );

    // Opening may replay a long journal and scan the payload tree
    let open_config = config.clone();
    let state = tokio::task::spawn_blocking(move || AppState::from_config(&open_config))
        .await
        .context("store open task failed")?
        .with_context(|| format!("failed to open cache store at {:?}", config.store_dir))?;

    let sweep_handle = spawn_sweep_task(state.cache.clone(), config.sweep_interval);

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweep_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the sweep task and allows graceful shutdown.
async fn shutdown_signal(sweep_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // A sweep already on the blocking pool runs to completion
    sweep_handle.abort();
    warn!("Sweep task aborted");
}
