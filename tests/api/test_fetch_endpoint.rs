// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! POST /fetch status codes and response shape

use axum::http::{header, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use webfetch_proxy::proxy::ProxyConfig;

use super::helpers::{app, json_body, post_json, secured_config, send, API_KEY};
use crate::mock_transport::MockTransport;

#[tokio::test]
async fn test_fetch_success() {
    let transport = Arc::new(MockTransport::new());
    let app = app(ProxyConfig::default(), transport.clone());

    let response = send(
        &app,
        post_json(
            "/fetch",
            json!({"url": "https://example.com/page", "tags": ["docs"]}),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["contentType"], "text/html");
    assert_eq!(body["contentEncoding"], "utf8");
    assert_eq!(body["cacheHit"], false);
    assert_eq!(body["metadata"]["title"], "/page");
    assert!(body["tags"].as_array().unwrap().iter().any(|t| t == "docs"));
    assert!(body["requestId"].as_str().unwrap().len() > 10);
}

#[tokio::test]
async fn test_second_fetch_reports_cache_hit() {
    let transport = Arc::new(MockTransport::new());
    let app = app(ProxyConfig::default(), transport.clone());
    let request = || post_json("/fetch", json!({"url": "https://example.com/c"}), None);

    send(&app, request()).await;
    let body = json_body(send(&app, request()).await).await;
    assert_eq!(body["cacheHit"], true);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_missing_token_is_401() {
    let transport = Arc::new(MockTransport::new());
    let app = app(secured_config(), transport.clone());

    let response = send(
        &app,
        post_json("/fetch", json!({"url": "https://example.com/"}), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["errorType"], "unauthorized");

    let response = send(
        &app,
        post_json("/fetch", json!({"url": "https://example.com/"}), Some(API_KEY)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_blocked_domain_is_403() {
    let app = app(ProxyConfig::default(), Arc::new(MockTransport::new()));

    let response = send(
        &app,
        post_json("/fetch", json!({"url": "http://169.254.169.254/latest"}), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = json_body(response).await;
    assert_eq!(body["errorType"], "domain_blocked");
    assert!(body["requestId"].is_string());
}

#[tokio::test]
async fn test_rate_limited_is_429_with_retry_after() {
    let mut config = ProxyConfig::default();
    config.rate_limit.requests_per_minute = 1;
    let app = app(config, Arc::new(MockTransport::new()));

    send(&app, post_json("/fetch", json!({"url": "https://example.com/1"}), None)).await;
    let response = send(
        &app,
        post_json("/fetch", json!({"url": "https://example.com/2"}), None),
    )
    .await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(
        json_body(response).await["details"]["retryAfterSecs"],
        retry_after
    );
}

#[tokio::test]
async fn test_timeout_is_504_and_connection_error_is_502() {
    let transport = Arc::new(
        MockTransport::new()
            .slow("/slow", Duration::from_millis(500))
            .failing("/down", 1),
    );
    let app = app(ProxyConfig::default(), transport);

    let response = send(
        &app,
        post_json(
            "/fetch",
            json!({"url": "https://example.com/slow", "timeout": 0.05}),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let response = send(
        &app,
        post_json("/fetch", json!({"url": "https://example.com/down"}), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_invalid_requests_are_400() {
    let transport = Arc::new(MockTransport::new());
    let app = app(ProxyConfig::default(), transport.clone());

    for body in [
        json!({"url": "not a url"}),
        json!({"url": "ftp://example.com/file"}),
        json!({"url": "https://example.com", "timeout": -1}),
        json!({"url": "https://example.com", "method": "TRACE"}),
        json!({"nourl": true}),
    ] {
        let response = send(&app, post_json("/fetch", body.clone(), None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
    }
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_upstream_404_is_reported_not_raised() {
    let transport = Arc::new(MockTransport::new().status("/missing", 404));
    let app = app(ProxyConfig::default(), transport);

    let response = send(
        &app,
        post_json("/fetch", json!({"url": "https://example.com/missing"}), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 404);
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn test_authentication_checked_before_body_validation() {
    let transport = Arc::new(MockTransport::new());
    let app = app(secured_config(), transport.clone());

    let response = send(&app, post_json("/fetch", json!({"url": "not a url"}), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["errorType"], "unauthorized");

    let response = send(
        &app,
        post_json("/fetch", json!({"url": "not a url"}), Some(API_KEY)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_headers_forwarded_in_caller_order() {
    let transport = Arc::new(MockTransport::new());
    let app = app(ProxyConfig::default(), transport.clone());

    let response = send(
        &app,
        post_json(
            "/fetch",
            json!({
                "url": "https://example.com/h",
                "headers": [["X-Zeta", "1"], ["X-Alpha", "2"], ["X-Zeta", "3"]]
            }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let caller_headers: Vec<(String, String)> = transport
        .last_headers()
        .into_iter()
        .filter(|(name, _)| name.starts_with("X-") && name != "X-Request-ID")
        .collect();
    assert_eq!(
        caller_headers,
        vec![
            ("X-Zeta".to_string(), "1".to_string()),
            ("X-Alpha".to_string(), "2".to_string()),
            ("X-Zeta".to_string(), "3".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_redirect_to_internal_host_is_403() {
    let transport = Arc::new(MockTransport::new().redirect("/r", "http://10.0.0.5/private"));
    let app = app(ProxyConfig::default(), transport);

    let response = send(
        &app,
        post_json("/fetch", json!({"url": "https://example.com/r"}), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["errorType"], "domain_blocked");
}
