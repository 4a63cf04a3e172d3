// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Response cache with single-flight fetch coalescing

pub mod fingerprint;
pub mod store;

pub use fingerprint::Fingerprint;
pub use store::{CacheEntry, CacheStore, MemoryStore, StoreError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::types::FetchResult;

/// Result of a cache read
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(FetchResult),
    Miss,
}

/// How a coalesced call obtained its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightSource {
    /// This caller led the flight and the transport was called
    Fetched,
    /// The leader found a stored entry on its re-check
    Stored,
    /// This caller joined a flight led by someone else
    Coalesced,
}

#[derive(Debug, Clone)]
struct FlightOutcome {
    result: FetchResult,
    from_store: bool,
}

type Flight = Shared<BoxFuture<'static, FlightOutcome>>;

/// Removes the in-flight registration when the flight ends or is dropped
struct FlightGuard {
    in_flight: Arc<DashMap<Fingerprint, Flight>>,
    key: Fingerprint,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Cache layer over a [`CacheStore`]
///
/// Store failures never fail a request: reads degrade to a miss and writes are
/// skipped, with the degraded flag raised until the store answers again.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    in_flight: Arc<DashMap<Fingerprint, Flight>>,
    ttl: Duration,
    negative_ttl: Option<Duration>,
    degraded: Arc<AtomicBool>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, negative_ttl: Option<Duration>) -> Self {
        Self {
            store,
            in_flight: Arc::new(DashMap::new()),
            ttl,
            negative_ttl,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn get(&self, key: &Fingerprint) -> CacheLookup {
        lookup(&self.store, &self.degraded, key).await
    }

    pub async fn put(&self, key: Fingerprint, result: FetchResult, ttl: Duration) {
        store_result(&self.store, &self.degraded, key, result, ttl).await
    }

    /// Run `fetch` at most once across concurrent callers for `key`
    ///
    /// The first caller registers a shared flight; later callers await the same
    /// flight and receive an identical result. The flight re-checks the store
    /// before fetching and stores a cacheable outcome before completing.
    pub async fn get_or_fetch<F>(&self, key: Fingerprint, fetch: F) -> (FetchResult, FlightSource)
    where
        F: FnOnce() -> BoxFuture<'static, FetchResult>,
    {
        let (flight, leader) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let flight = self.flight(key.clone(), fetch()).boxed().shared();
                entry.insert(flight.clone());
                (flight, true)
            }
        };

        if !leader {
            debug!("Joining in-flight fetch {}", key);
        }

        let outcome = flight.await;
        let source = match (leader, outcome.from_store) {
            (false, _) => FlightSource::Coalesced,
            (true, true) => FlightSource::Stored,
            (true, false) => FlightSource::Fetched,
        };
        (outcome.result, source)
    }

    fn flight(
        &self,
        key: Fingerprint,
        fetch: BoxFuture<'static, FetchResult>,
    ) -> impl std::future::Future<Output = FlightOutcome> + Send + 'static {
        let guard = FlightGuard {
            in_flight: self.in_flight.clone(),
            key: key.clone(),
        };
        let store = self.store.clone();
        let degraded = self.degraded.clone();
        let ttl = self.ttl;
        let negative_ttl = self.negative_ttl;

        async move {
            let _guard = guard;

            if let CacheLookup::Hit(result) = lookup(&store, &degraded, &key).await {
                return FlightOutcome {
                    result,
                    from_store: true,
                };
            }

            let result = fetch.await;
            if let Some(ttl) = cache_ttl_for(&result, ttl, negative_ttl) {
                store_result(&store, &degraded, key, result.clone(), ttl).await;
            }
            FlightOutcome {
                result,
                from_store: false,
            }
        }
    }

    /// Remove every entry, returning how many were removed
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let cleared = self.store.clear().await;
        self.note(&cleared);
        cleared
    }

    /// Drop expired entries
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        let purged = self.store.purge_expired().await;
        self.note(&purged);
        purged
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.len().await
    }

    /// Probe the store and update the degraded flag
    pub async fn ping(&self) -> Result<(), StoreError> {
        let result = self.store.ping().await;
        self.note(&result);
        result
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Number of fingerprints with a fetch in progress
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn note<T>(&self, result: &Result<T, StoreError>) {
        record_store_health(&self.degraded, result);
    }
}

/// TTL for a freshly fetched result, `None` when it must not be stored
fn cache_ttl_for(
    result: &FetchResult,
    ttl: Duration,
    negative_ttl: Option<Duration>,
) -> Option<Duration> {
    match &result.error {
        None if result.success => Some(ttl),
        None => None,
        Some(kind) if kind.is_admission_denial() => None,
        Some(_) => negative_ttl,
    }
}

async fn lookup(
    store: &Arc<dyn CacheStore>,
    degraded: &AtomicBool,
    key: &Fingerprint,
) -> CacheLookup {
    let found = store.get(key).await;
    record_store_health(degraded, &found);
    match found {
        Ok(Some(entry)) if !entry.is_expired(Instant::now()) => CacheLookup::Hit(entry.result),
        Ok(_) => CacheLookup::Miss,
        Err(e) => {
            warn!("Cache read failed, continuing without cache: {}", e);
            CacheLookup::Miss
        }
    }
}

async fn store_result(
    store: &Arc<dyn CacheStore>,
    degraded: &AtomicBool,
    key: Fingerprint,
    result: FetchResult,
    ttl: Duration,
) {
    let now = Instant::now();
    let entry = CacheEntry {
        fingerprint: key,
        result,
        inserted_at: now,
        expires_at: now + ttl,
    };
    let stored = store.put(entry).await;
    record_store_health(degraded, &stored);
    if let Err(e) = stored {
        warn!("Cache write failed, result not cached: {}", e);
    }
}

fn record_store_health<T>(degraded: &AtomicBool, result: &Result<T, StoreError>) {
    let failed = result.is_err();
    if degraded.swap(failed, Ordering::Relaxed) != failed {
        if failed {
            warn!("Cache backend degraded");
        } else {
            debug!("Cache backend recovered");
        }
    }
}
