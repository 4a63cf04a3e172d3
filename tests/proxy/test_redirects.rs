// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Redirect destinations re-checked against the domain policy

use super::mock_transport::{proxy_with, MockTransport};
use std::sync::Arc;
use webfetch_proxy::proxy::{Credentials, ErrorKind, FetchRequest, ProxyConfig};

fn get(url: &str) -> FetchRequest {
    FetchRequest::builder(url).build().unwrap()
}

#[tokio::test]
async fn test_redirect_to_metadata_address_blocked() {
    let transport = Arc::new(MockTransport::new().redirect(
        "/innocent",
        "http://169.254.169.254/latest/meta-data",
    ));
    let proxy = proxy_with(ProxyConfig::default(), transport.clone());
    let creds = Credentials::anonymous();

    let result = proxy.fetch(&creds, get("https://example.com/innocent")).await;
    assert!(matches!(result.error, Some(ErrorKind::DomainBlocked { .. })));
    assert!(!result.success);
    assert!(result.body.is_empty());
    assert!(result.status_code.is_none());

    let blocked = proxy.blocked(10);
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].url, "https://example.com/innocent");

    // Refused destinations are never cached
    let again = proxy.fetch(&creds, get("https://example.com/innocent")).await;
    assert!(!again.cache_hit);
    assert_eq!(transport.calls_to("/innocent"), 2);
}

#[tokio::test]
async fn test_redirect_outside_allow_list_blocked() {
    let transport = Arc::new(
        MockTransport::new()
            .redirect("/out", "https://tracker.net/landing")
            .redirect("/in", "https://www.example.com/landing"),
    );
    let mut config = ProxyConfig::default();
    config.security.allowed_domains = vec!["example.com".to_string()];
    let proxy = proxy_with(config, transport);
    let creds = Credentials::anonymous();

    let out = proxy.fetch(&creds, get("https://example.com/out")).await;
    assert!(matches!(out.error, Some(ErrorKind::DomainBlocked { .. })));

    let inside = proxy.fetch(&creds, get("https://example.com/in")).await;
    assert!(inside.success);
    assert_eq!(inside.final_url, "https://www.example.com/landing");
}

#[tokio::test]
async fn test_unfollowed_redirect_to_internal_host_returned_as_is() {
    let transport = Arc::new(MockTransport::new().redirect("/hop", "http://127.0.0.1/admin"));
    let proxy = proxy_with(ProxyConfig::default(), transport);

    let request = FetchRequest::builder("https://example.com/hop")
        .follow_redirects(false)
        .build()
        .unwrap();
    let result = proxy.fetch(&Credentials::anonymous(), request).await;
    assert!(result.error.is_none());
    assert_eq!(result.status_code, Some(301));
    assert_eq!(
        result.headers.get("location").map(String::as_str),
        Some("http://127.0.0.1/admin")
    );
}
