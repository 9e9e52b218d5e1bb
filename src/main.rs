// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc};

use axum_server::Handle;
use citypulse_api::{
    api::router,
    cache::{CacheStore, MemoryCache, RedisCache},
    config::{log_format_from_env, AppConfig, LogFormat},
    sms,
    state::AppState,
    storage::Store,
    sweeper::SessionSweeper,
    tls::load_rustls_config,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

/// Entries kept by the in-process cache when Redis is not configured.
const MEMORY_CACHE_CAPACITY: usize = 100_000;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    match log_format_from_env() {
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env().expect("Invalid configuration");
    tracing::info!(environment = config.environment.as_str(), "Starting CityPulse API");

    let store = Store::open(&config.database_path).expect("Failed to open database");
    tracing::info!(path = %config.database_path.display(), "Database opened");

    let cache: Arc<dyn CacheStore> = match config.redis_url.as_deref() {
        Some(url) => Arc::new(
            RedisCache::connect(url)
                .await
                .expect("Failed to connect to Redis"),
        ),
        None => {
            tracing::warn!("REDIS_URL not set, using in-process cache");
            Arc::new(MemoryCache::new(MEMORY_CACHE_CAPACITY))
        }
    };
    let sms = sms::from_config(&config.sms).expect("Failed to configure SMS provider");
    tracing::info!(cache = cache.backend(), sms = sms.provider(), "Backends ready");

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");
    let tls = config.tls.clone();
    let sweep_interval = config.session_sweep_interval;

    let state = AppState::new(config, store, cache, sms).expect("Failed to initialize state");

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(
        SessionSweeper::new(state.store.clone(), sweep_interval).run(shutdown.clone()),
    );

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
            handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
        }
    });

    match tls {
        Some(paths) => {
            let tls_config = load_rustls_config(&paths)
                .await
                .expect("Failed to load TLS certificate");
            tracing::info!(%addr, "Listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app)
                .await
                .expect("HTTPS server failed");
        }
        None => {
            tracing::info!(%addr, "Listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app)
                .await
                .expect("HTTP server failed");
        }
    }

    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "session sweeper task failed");
    }
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
