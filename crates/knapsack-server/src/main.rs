//! Knapsack Server - Main entry point

use anyhow::Result;
use knapsack_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tracing::info;

use knapsack_server::{
    config::Config,
    fetch::{FetchConfig, S3Fetcher},
    middleware, routes,
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("knapsack-server")
        .filter_directives("knapsack_server=debug,knapsack_import=info,tower_http=debug")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Knapsack Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}, importing into {}",
        config.server.host, config.server.port, config.cluster.url
    );

    let fetcher = S3Fetcher::new(&FetchConfig::from_env()?);
    info!("S3 fetcher initialized");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let shutdown_timeout = config.server.shutdown_timeout_secs;

    let state = AppState::new(config).with_fetcher(fetcher);
    let app = routes::router(state).layer(middleware::tracing_layer());

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Running imports are detached tasks; give them a moment to flush
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
