// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Info, health, stats and maintenance endpoints

use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use webfetch_proxy::proxy::ProxyConfig;

use super::helpers::{
    app, app_with_store, get, json_body, post_json, secured_config, send, API_KEY,
};
use crate::mock_transport::{MockTransport, UnreachableStore};

#[tokio::test]
async fn test_root_reports_service_info() {
    let app = app(ProxyConfig::default(), Arc::new(MockTransport::new()));
    let body = json_body(send(&app, get("/", None)).await).await;

    assert_eq!(body["service"], "webfetch-proxy");
    assert!(body["version"].is_string());
    assert!(body["features"].as_array().unwrap().len() > 3);
}

#[tokio::test]
async fn test_health_is_public() {
    let app = app(secured_config(), Arc::new(MockTransport::new()));
    let response = send(&app, get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cacheReachable"], true);
    assert_eq!(body["cacheEntries"], 0);
}

#[tokio::test]
async fn test_stats_track_hits() {
    let app = app(ProxyConfig::default(), Arc::new(MockTransport::new()));
    for _ in 0..2 {
        send(&app, post_json("/fetch", json!({"url": "https://example.com/s"}), None)).await;
    }

    let body = json_body(send(&app, get("/stats", None)).await).await;
    assert_eq!(body["requestCount"], 2);
    assert_eq!(body["cacheHits"], 1);
    assert_eq!(body["cacheHitRate"], 0.5);
    assert_eq!(body["cacheDegraded"], false);
}

#[tokio::test]
async fn test_unreachable_cache_reported_degraded() {
    let transport = Arc::new(MockTransport::new());
    let app = app_with_store(ProxyConfig::default(), transport.clone(), Arc::new(UnreachableStore));

    let response = send(
        &app,
        post_json("/fetch", json!({"url": "https://example.com/d"}), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);

    let health = json_body(send(&app, get("/health", None)).await).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["cacheReachable"], false);

    let stats = json_body(send(&app, get("/stats", None)).await).await;
    assert_eq!(stats["cacheDegraded"], true);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_cache_clear_requires_auth_and_counts_entries() {
    let transport = Arc::new(MockTransport::new());
    let app = app(secured_config(), transport.clone());
    send(
        &app,
        post_json("/fetch", json!({"url": "https://example.com/x"}), Some(API_KEY)),
    )
    .await;

    let response = send(&app, post_json("/cache/clear", json!({}), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, post_json("/cache/clear", json!({}), Some(API_KEY))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["clearedEntryCount"], 1);
}

#[tokio::test]
async fn test_blocked_requests_listed_newest_first() {
    let app = app(ProxyConfig::default(), Arc::new(MockTransport::new()));
    send(&app, post_json("/fetch", json!({"url": "http://localhost/a"}), None)).await;
    send(&app, post_json("/fetch", json!({"url": "http://127.0.0.1/b"}), None)).await;

    let body = json_body(send(&app, get("/blocked/requests?limit=1", None)).await).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["records"][0]["reason"], "DOMAIN_BLOCKED");
    assert_eq!(body["records"][0]["url"], "http://127.0.0.1/b");
}

#[tokio::test]
async fn test_config_view_redacts_api_key() {
    let app = app(secured_config(), Arc::new(MockTransport::new()));

    let response = send(&app, get("/config", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, get("/config", Some(API_KEY))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["security"]["api_key"], "***REDACTED***");
    assert!(!body.to_string().contains(API_KEY));
}

#[tokio::test]
async fn test_housekeeping_cleanup() {
    let app = app(ProxyConfig::default(), Arc::new(MockTransport::new()));
    let response = send(&app, post_json("/housekeeping/cleanup", json!({}), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["expiredCacheEntries"], 0);
    assert_eq!(body["idleRateWindows"], 0);
}
