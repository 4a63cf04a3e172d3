// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Scripted transport shared by the proxy and API tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webfetch_proxy::proxy::{
    CacheEntry, CacheStore, FetchProxy, Fingerprint, MemoryStore, OutboundRequest, ProxyConfig,
    StoreError, Transport, TransportError, TransportResponse,
};

/// Answers every request with a small HTML page titled after the URL path.
/// Paths can be made slow, failing, redirecting or given a fixed status.
#[derive(Default)]
pub struct MockTransport {
    delay: Duration,
    slow: HashMap<String, Duration>,
    statuses: HashMap<String, u16>,
    redirects: HashMap<String, String>,
    failures: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    calls_by_path: Mutex<HashMap<String, usize>>,
    seen_headers: Mutex<Vec<Vec<(String, String)>>>,
    seen_options: Mutex<Vec<(bool, bool)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn slow(mut self, path: &str, delay: Duration) -> Self {
        self.slow.insert(path.to_string(), delay);
        self
    }

    pub fn status(mut self, path: &str, status: u16) -> Self {
        self.statuses.insert(path.to_string(), status);
        self
    }

    /// Answer `path` with a 301 to `target`, or with the target's page when
    /// the request follows redirects
    pub fn redirect(mut self, path: &str, target: &str) -> Self {
        self.redirects.insert(path.to_string(), target.to_string());
        self
    }

    /// Refuse the first `times` connections to `path`
    pub fn failing(self, path: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(path.to_string(), times);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls_by_path
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> Vec<(String, String)> {
        self.seen_headers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }

    /// `(follow_redirects, verify_ssl)` of every request sent, in order
    pub fn options_seen(&self) -> Vec<(bool, bool)> {
        self.seen_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let path = request.url.path().to_string();
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_path
            .lock()
            .unwrap()
            .entry(path.clone())
            .or_insert(0) += 1;
        self.seen_headers
            .lock()
            .unwrap()
            .push(request.headers.clone());
        self.seen_options
            .lock()
            .unwrap()
            .push((request.follow_redirects, request.verify_ssl));

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let delay = self.slow.get(&path).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Connect("connection refused".to_string()));
                }
            }
        }

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "text/html; charset=utf-8".to_string(),
        );
        let mut status = self.statuses.get(&path).copied().unwrap_or(200);
        let mut final_url = request.url.to_string();
        if let Some(target) = self.redirects.get(&path) {
            if request.follow_redirects {
                final_url = target.clone();
            } else {
                status = 301;
                headers.insert("location".to_string(), target.clone());
            }
        }
        Ok(TransportResponse {
            status,
            headers,
            final_url,
            body: Bytes::from(format!(
                "<html><head><title>{}</title></head><body>ok</body></html>",
                path
            )),
        })
    }
}

/// Proxy over the mock transport with an in-memory cache and no record sink
pub fn proxy_with(config: ProxyConfig, transport: Arc<MockTransport>) -> FetchProxy {
    let store = Arc::new(MemoryStore::new(config.cache.max_entries));
    FetchProxy::new(config, transport, store, None)
}

/// Proxy over the mock transport with a caller-supplied cache store
pub fn proxy_with_store(
    config: ProxyConfig,
    transport: Arc<MockTransport>,
    store: Arc<dyn CacheStore>,
) -> FetchProxy {
    FetchProxy::new(config, transport, store, None)
}

/// Cache backend that is never reachable
pub struct UnreachableStore;

fn unreachable() -> StoreError {
    StoreError::Unreachable("connection refused".to_string())
}

#[async_trait]
impl CacheStore for UnreachableStore {
    async fn get(&self, _key: &Fingerprint) -> Result<Option<CacheEntry>, StoreError> {
        Err(unreachable())
    }
    async fn put(&self, _entry: CacheEntry) -> Result<(), StoreError> {
        Err(unreachable())
    }
    async fn clear(&self) -> Result<usize, StoreError> {
        Err(unreachable())
    }
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Err(unreachable())
    }
    async fn len(&self) -> Result<usize, StoreError> {
        Err(unreachable())
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Err(unreachable())
    }
}
