// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Service info, health, stats and maintenance endpoints

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::errors::ApiErrorResponse;
use crate::api::fetch::handler::credentials_from;
use crate::api::http_server::AppState;
use crate::proxy::intelligence::BLOCKED_LOG_CAPACITY;
use crate::proxy::{BlockedRecord, HealthReport, HousekeepingReport, ProxyConfig, StatsSnapshot};
use crate::version;

const DEFAULT_BLOCKED_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResponse {
    pub cleared_entry_count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlockedQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedResponse {
    pub count: usize,
    pub records: Vec<BlockedRecord>,
}

/// GET / - Service name, version and features
pub async fn info_handler() -> Json<serde_json::Value> {
    Json(version::get_version_info())
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.proxy.health().await)
}

/// GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.proxy.stats())
}

/// POST /cache/clear
pub async fn clear_cache_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClearCacheResponse>, ApiErrorResponse> {
    let cleared_entry_count = state.proxy.clear_cache(&credentials_from(&headers)).await?;
    Ok(Json(ClearCacheResponse {
        cleared_entry_count,
    }))
}

/// GET /blocked/requests?limit=N - Recent denials and failures, newest first
pub async fn blocked_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BlockedQuery>,
) -> Result<Json<BlockedResponse>, ApiErrorResponse> {
    state.proxy.authenticate(&credentials_from(&headers))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_BLOCKED_LIMIT)
        .min(BLOCKED_LOG_CAPACITY);
    let records = state.proxy.blocked(limit);
    Ok(Json(BlockedResponse {
        count: records.len(),
        records,
    }))
}

/// GET /config - Effective configuration with secrets redacted
pub async fn config_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProxyConfig>, ApiErrorResponse> {
    state.proxy.authenticate(&credentials_from(&headers))?;
    Ok(Json(state.proxy.config().sanitized()))
}

/// POST /housekeeping/cleanup
pub async fn housekeeping_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HousekeepingReport>, ApiErrorResponse> {
    state.proxy.authenticate(&credentials_from(&headers))?;
    let report = state.proxy.housekeeping().await;
    info!(
        "Manual cleanup removed {} cache entries and {} rate windows",
        report.expired_cache_entries, report.idle_rate_windows
    );
    Ok(Json(report))
}
