//! Gasless relayer binary.

use gasless_relayer::{create_router, AppState, Config};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cadence for pruning expired nonce claims and rate-limit windows.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gasless relayer");

    let config: Config = config::Config::builder()
        .add_source(config::File::with_name("relayer").required(false))
        .add_source(config::Environment::with_prefix("RELAYER"))
        .build()
        .and_then(|c| c.try_deserialize())
        .unwrap_or_else(|e| {
            // Fall back only when no config exists; parsing errors fail hard.
            let err_str = format!("{e}");
            if err_str.contains("not found") || err_str.contains("missing field") {
                warn!(error = %e, "No config file found, using defaults");
                Config::default()
            } else {
                error!(error = %e, "FATAL: Config error, fix env vars or relayer.toml");
                std::process::exit(1);
            }
        });

    info!(
        upstream = %config.upstream_url,
        chain_id = config.chain_id,
        environment = %config.environment,
        "Configuration loaded"
    );

    let bind_address = config.bind_address.clone();
    let poll_interval = Duration::from_secs(config.poll_interval_secs);
    let state = Arc::new(AppState::new(config).await?);

    info!(
        nonce_backend = state.gateway.nonce_guard().backend(),
        fleet_wallets = state.fleet.wallet_count(),
        "Relayer ready"
    );

    let cancel = CancellationToken::new();

    // Periodic cleanup of expired nonce claims and rate-limit windows.
    let state_purge = Arc::clone(&state);
    let cancel_purge = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel_purge.cancelled() => break,
                _ = ticker.tick() => {
                    let nonces = state_purge.gateway.nonce_guard().purge_expired().await;
                    let windows = state_purge.gateway.rate_cache().purge_expired();
                    if nonces > 0 || windows > 0 {
                        info!(nonces, windows, "Purged expired entries");
                    }
                }
            }
        }
    });

    // Fleet balance poller.
    let state_fleet = Arc::clone(&state);
    let cancel_fleet = cancel.clone();
    tokio::spawn(async move {
        state_fleet.fleet.run_poller(poll_interval, cancel_fleet).await;
    });

    let app = create_router(state.clone());

    info!(address = %bind_address, "Listening");

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel.cancel();
    info!("Relayer shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
