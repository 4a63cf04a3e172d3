// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Authentication, domain policy and rate limiting

use super::mock_transport::{proxy_with, MockTransport};
use std::sync::Arc;
use webfetch_proxy::proxy::{Credentials, ErrorKind, FetchRequest, ProxyConfig};

fn get(url: &str) -> FetchRequest {
    FetchRequest::builder(url).build().unwrap()
}

#[tokio::test]
async fn test_third_request_in_minute_is_rate_limited() {
    let transport = Arc::new(MockTransport::new());
    let mut config = ProxyConfig::default();
    config.rate_limit.requests_per_minute = 2;
    let proxy = proxy_with(config, transport.clone());
    let creds = Credentials::anonymous();

    assert!(proxy.fetch(&creds, get("https://example.com/1")).await.success);
    assert!(proxy.fetch(&creds, get("https://example.com/2")).await.success);

    let third = proxy.fetch(&creds, get("https://example.com/3")).await;
    match third.error {
        Some(ErrorKind::RateLimited { retry_after_secs }) => {
            assert!((1..=60).contains(&retry_after_secs));
        }
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert_eq!(transport.calls(), 2);
    assert_eq!(proxy.blocked(10)[0].reason, "RATE_LIMIT");
}

#[tokio::test]
async fn test_rate_limit_is_per_caller() {
    let transport = Arc::new(MockTransport::new());
    let mut config = ProxyConfig::default();
    config.rate_limit.requests_per_minute = 1;
    config.security.api_key = Some("shared-key-0001".to_string());
    let proxy = proxy_with(config, transport.clone());
    let creds = Credentials::bearer("shared-key-0001");

    assert!(proxy.fetch(&creds, get("https://example.com/x")).await.success);
    let denied = proxy.fetch(&creds, get("https://example.com/y")).await;
    assert!(matches!(denied.error, Some(ErrorKind::RateLimited { .. })));

    // A cache hit still counts against the window
    let cached = proxy.fetch(&creds, get("https://example.com/x")).await;
    assert!(matches!(cached.error, Some(ErrorKind::RateLimited { .. })));
}

#[tokio::test]
async fn test_allow_list_denies_other_domains() {
    let transport = Arc::new(MockTransport::new());
    let mut config = ProxyConfig::default();
    config.security.allowed_domains = vec!["example.com".to_string()];
    let proxy = proxy_with(config, transport.clone());
    let creds = Credentials::anonymous();

    let denied = proxy.fetch(&creds, get("https://evil.com/")).await;
    assert!(matches!(denied.error, Some(ErrorKind::DomainBlocked { .. })));
    assert!(proxy.fetch(&creds, get("https://docs.example.com/")).await.success);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_deny_list_and_internal_hosts() {
    let transport = Arc::new(MockTransport::new());
    let mut config = ProxyConfig::default();
    config.security.blocked_domains = vec!["tracker.net".to_string()];
    let proxy = proxy_with(config, transport.clone());
    let creds = Credentials::anonymous();

    for url in [
        "https://tracker.net/pixel",
        "https://ads.tracker.net/",
        "http://localhost/",
        "http://127.0.0.1:8080/",
        "http://10.0.0.5/",
        "http://[::1]/",
    ] {
        let result = proxy.fetch(&creds, get(url)).await;
        assert!(
            matches!(result.error, Some(ErrorKind::DomainBlocked { .. })),
            "{} should be blocked",
            url
        );
    }
    assert_eq!(transport.calls(), 0);
    assert_eq!(proxy.stats().blocked_count, 6);
}

#[tokio::test]
async fn test_domain_denial_does_not_consume_rate_window() {
    let transport = Arc::new(MockTransport::new());
    let mut config = ProxyConfig::default();
    config.rate_limit.requests_per_minute = 1;
    let proxy = proxy_with(config, transport.clone());
    let creds = Credentials::anonymous();

    proxy.fetch(&creds, get("http://localhost/")).await;
    assert!(proxy.fetch(&creds, get("https://example.com/")).await.success);
}

#[tokio::test]
async fn test_unauthenticated_never_reaches_transport() {
    let transport = Arc::new(MockTransport::new());
    let mut config = ProxyConfig::default();
    config.security.api_key = Some("top-secret-9876".to_string());
    let proxy = proxy_with(config, transport.clone());

    let result = proxy
        .fetch(&Credentials::bearer("guess"), get("https://example.com/"))
        .await;
    assert_eq!(result.error, Some(ErrorKind::Unauthenticated));
    assert!(proxy.clear_cache(&Credentials::anonymous()).await.is_err());
    assert_eq!(transport.calls(), 0);
}
