//! Hookbars Server - Main entry point

use anyhow::{Context, Result};
use hookbars_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hookbars_server::{
    api,
    config::Config,
    db,
    features::FeatureState,
    materializer::{Materializer, PgCheckpointStore},
};

const DEFAULT_LOG_FILTER: &str = "hookbars_server=debug,tower_http=info,sqlx=warn";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let fallback = LogConfig::builder()
        .log_file_prefix("hookbars-server")
        .filter_directives(DEFAULT_LOG_FILTER)
        .build();
    let mut log_config = LogConfig::from_env().unwrap_or(fallback);
    if log_config.filter_directives.is_none() {
        log_config.filter_directives = Some(DEFAULT_LOG_FILTER.to_string());
    }
    let _log_guard = init_logging(&log_config)?;

    info!("Starting hookbars server");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration, aborting startup");
            return Err(e);
        },
    };
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool).await?;
    info!("Database migrations completed");

    let shutdown = CancellationToken::new();

    let (materializer_handle, materializer_state) = if config.materializer.enabled {
        let store = PgCheckpointStore::from_config(pool.clone(), &config);
        let materializer = Materializer::new(store, config.materializer.clone());
        let state = materializer.subscribe();
        (Some(materializer.spawn(shutdown.clone())), Some(state))
    } else {
        info!("Materializer is disabled (MATERIALIZER_ENABLED=false)");
        (None, None)
    };

    let state = FeatureState {
        db: pool.clone(),
        receiver: Arc::new(config.receiver.clone()),
        materializer_route: config.materializer.route.clone(),
        materializer_state,
    };
    let app = api::create_router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    info!("HTTP server stopped");

    // Also covers the server exiting without a signal
    shutdown.cancel();
    if let Some(handle) = materializer_handle {
        let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(summary)) => info!(
                cycles = summary.cycles,
                inserted = summary.inserted,
                "Materializer finished"
            ),
            Ok(Err(e)) => tracing::error!(error = %e, "Materializer task panicked"),
            Err(_) => tracing::warn!(
                timeout_secs = config.server.shutdown_timeout_secs,
                "Materializer did not finish its cycle in time"
            ),
        }
    }

    pool.close().await;
    info!("Server shut down gracefully");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels background work
async fn shutdown_signal(shutdown: CancellationToken) {
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

    shutdown.cancel();
}
