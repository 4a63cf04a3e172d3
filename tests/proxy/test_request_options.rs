// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-request transport options and status allow lists against the cache

use super::mock_transport::{proxy_with, MockTransport};
use std::sync::Arc;
use std::time::Duration;
use webfetch_proxy::proxy::{Credentials, FetchRequest, ProxyConfig};

fn get(url: &str) -> FetchRequest {
    FetchRequest::builder(url).build().unwrap()
}

#[tokio::test]
async fn test_unfollowed_redirect_not_served_to_following_caller() {
    let transport = Arc::new(
        MockTransport::new().redirect("/moved", "https://example.com/landing"),
    );
    let proxy = proxy_with(ProxyConfig::default(), transport.clone());
    let creds = Credentials::anonymous();

    let manual = FetchRequest::builder("https://example.com/moved")
        .follow_redirects(false)
        .build()
        .unwrap();
    let first = proxy.fetch(&creds, manual).await;
    assert_eq!(first.status_code, Some(301));

    let followed = proxy.fetch(&creds, get("https://example.com/moved")).await;
    assert!(!followed.cache_hit);
    assert_eq!(followed.status_code, Some(200));
    assert_eq!(followed.final_url, "https://example.com/landing");
    assert_eq!(transport.calls_to("/moved"), 2);
    assert_eq!(transport.options_seen(), vec![(false, true), (true, true)]);
}

#[tokio::test]
async fn test_unverified_fetch_not_served_to_verifying_caller() {
    let transport = Arc::new(MockTransport::new());
    let proxy = proxy_with(ProxyConfig::default(), transport.clone());
    let creds = Credentials::anonymous();

    let insecure = FetchRequest::builder("https://example.com/cert")
        .verify_ssl(false)
        .build()
        .unwrap();
    assert!(proxy.fetch(&creds, insecure).await.success);

    let verified = proxy.fetch(&creds, get("https://example.com/cert")).await;
    assert!(!verified.cache_hit);
    assert_eq!(transport.calls_to("/cert"), 2);
    assert_eq!(transport.options_seen(), vec![(true, false), (true, true)]);

    // Same options as a stored entry still hit
    let again = proxy.fetch(&creds, get("https://example.com/cert")).await;
    assert!(again.cache_hit);
    assert_eq!(transport.calls_to("/cert"), 2);
}

#[tokio::test]
async fn test_cached_status_judged_by_each_callers_allow_list() {
    let transport = Arc::new(MockTransport::new().status("/gone", 404));
    let proxy = proxy_with(ProxyConfig::default(), transport.clone());
    let creds = Credentials::anonymous();

    let lenient = || {
        FetchRequest::builder("https://example.com/gone")
            .allow_status_codes(vec![404])
            .build()
            .unwrap()
    };

    let first = proxy.fetch(&creds, lenient()).await;
    assert!(first.success);

    let strict = proxy.fetch(&creds, get("https://example.com/gone")).await;
    assert!(strict.cache_hit);
    assert_eq!(strict.status_code, Some(404));
    assert!(!strict.success);

    let lenient_again = proxy.fetch(&creds, lenient()).await;
    assert!(lenient_again.cache_hit);
    assert!(lenient_again.success);
    assert_eq!(transport.calls_to("/gone"), 1);
}

#[tokio::test]
async fn test_coalesced_waiters_judge_status_themselves() {
    let transport = Arc::new(
        MockTransport::new()
            .status("/gone", 404)
            .with_delay(Duration::from_millis(150)),
    );
    let proxy = Arc::new(proxy_with(ProxyConfig::default(), transport.clone()));

    let mut handles = Vec::new();
    for i in 0..6 {
        let proxy = proxy.clone();
        handles.push(tokio::spawn(async move {
            let mut builder = FetchRequest::builder("https://example.com/gone");
            let lenient = i % 2 == 0;
            if lenient {
                builder = builder.allow_status_codes(vec![404]);
            }
            let result = proxy
                .fetch(&Credentials::anonymous(), builder.build().unwrap())
                .await;
            (lenient, result)
        }));
    }

    for handle in handles {
        let (lenient, result) = handle.await.unwrap();
        assert_eq!(result.status_code, Some(404));
        assert_eq!(result.success, lenient);
    }
    assert_eq!(transport.calls_to("/gone"), 1);
}
