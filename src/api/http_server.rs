// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::admin::{
    blocked_handler, clear_cache_handler, config_handler, health_handler, housekeeping_handler,
    info_handler, stats_handler,
};
use super::bulk::bulk_handler;
use super::fetch::fetch_handler;
use crate::proxy::{FetchProxy, ProxyConfig};
use crate::version;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<FetchProxy>,
}

impl AppState {
    pub fn new(proxy: FetchProxy) -> Self {
        Self {
            proxy: Arc::new(proxy),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Service info
        .route("/", get(info_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        // Fetch endpoints
        .route("/fetch", post(fetch_handler))
        .route("/fetch/bulk", post(bulk_handler))
        // Maintenance
        .route("/cache/clear", post(clear_cache_handler))
        .route("/blocked/requests", get(blocked_handler))
        .route("/config", get(config_handler))
        .route("/housekeeping/cleanup", post(housekeeping_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Periodic cache and rate-window sweep
fn spawn_sweeper(proxy: Arc<FetchProxy>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = proxy.housekeeping().await;
            debug!(
                "Sweep removed {} cache entries and {} rate windows",
                report.expired_cache_entries, report.idle_rate_windows
            );
        }
    })
}

pub async fn start_server(config: ProxyConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let sweep_interval = Duration::from_secs(config.server.sweep_interval_secs.max(1));

    let state = AppState::new(FetchProxy::from_config(config).await?);
    let sweeper = spawn_sweeper(state.proxy.clone(), sweep_interval);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("{} listening on {}", version::get_version_string(), addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
