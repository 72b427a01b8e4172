//! # Checkout API Server
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Checkout API Server                              │
//! │                                                                         │
//! │  Storefront ───► HTTP (8080) ───► Engine ───► SQLite                    │
//! │  Provider   ───►  webhooks          │                                   │
//! │                                     ├── ReservationSweeper              │
//! │                                     └── OutboxDispatcher ──► log        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `checkout-api [path/to/checkout.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use checkout_engine::{Engine, EngineConfig, LogPublisher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,checkout=debug,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting checkout API server...");

    let config = EngineConfig::load(std::env::args().nth(1).map(PathBuf::from))
        .context("loading configuration")?;
    let addr = config.bind_address();
    info!(%addr, ttl_secs = config.reservation.ttl_secs, "Configuration loaded");

    let engine = Engine::connect(config).await.context("starting engine")?;

    let sweeper = engine.spawn_sweeper();
    let dispatcher = engine.spawn_dispatcher(Arc::new(LogPublisher));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, checkout_api::router(engine.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Stopping background tasks");
    if let Err(e) = sweeper.shutdown().await {
        warn!(error = %e, "Sweeper did not stop cleanly");
    }
    if let Err(e) = dispatcher.shutdown().await {
        warn!(error = %e, "Outbox dispatcher did not stop cleanly");
    }
    engine.database().close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed the error is logged and that signal is
/// never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
