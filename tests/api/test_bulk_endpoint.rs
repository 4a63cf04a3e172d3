// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! POST /fetch/bulk ordering, per-item errors and batch validation

use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use webfetch_proxy::proxy::ProxyConfig;

use super::helpers::{app, json_body, post_json, secured_config, send, API_KEY};
use crate::mock_transport::MockTransport;

#[tokio::test]
async fn test_bulk_keeps_order_and_reports_item_errors() {
    let transport = Arc::new(MockTransport::new().slow("/u2", Duration::from_millis(200)));
    let app = app(ProxyConfig::default(), transport.clone());

    let response = send(
        &app,
        post_json(
            "/fetch/bulk",
            json!({
                "urls": [
                    "https://example.com/u1",
                    "https://example.com/u2",
                    "not a url",
                    "http://localhost/",
                    "https://example.com/u3"
                ],
                "concurrentLimit": 2
            }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["totalUrls"], 5);
    assert_eq!(body["successful"], 3);
    assert_eq!(body["failed"], 2);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["url"], "https://example.com/u1");
    assert_eq!(results[1]["url"], "https://example.com/u2");
    assert_eq!(results[2]["error"]["kind"], "invalidRequest");
    assert_eq!(results[3]["error"]["kind"], "domainBlocked");
    assert_eq!(results[4]["url"], "https://example.com/u3");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_bulk_requires_auth_for_whole_batch() {
    let transport = Arc::new(MockTransport::new());
    let app = app(secured_config(), transport.clone());
    let body = json!({"urls": ["https://example.com/a", "https://example.com/b"]});

    let response = send(&app, post_json("/fetch/bulk", body.clone(), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(transport.calls(), 0);

    let response = send(&app, post_json("/fetch/bulk", body, Some(API_KEY))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_bulk_batch_validation() {
    let mut config = ProxyConfig::default();
    config.bulk.max_urls = 2;
    let app = app(config, Arc::new(MockTransport::new()));

    for body in [
        json!({"urls": []}),
        json!({"urls": ["https://a.com", "https://b.com", "https://c.com"]}),
        json!({"urls": ["https://a.com"], "concurrentLimit": 0}),
    ] {
        let response = send(&app, post_json("/fetch/bulk", body.clone(), None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
    }
}

#[tokio::test]
async fn test_bulk_all_invalid_urls() {
    let transport = Arc::new(MockTransport::new());
    let app = app(ProxyConfig::default(), transport.clone());

    let response = send(
        &app,
        post_json("/fetch/bulk", json!({"urls": ["nope", "also nope"]}), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["failed"], 2);
    assert_eq!(transport.calls(), 0);
}
