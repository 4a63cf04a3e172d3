// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Fetch mediation pipeline
//!
//! Every request passes admission (auth, domain, rate), then the cache and
//! single-flight layer, then the executor under the global concurrency
//! ceiling, and finally classification and intelligence recording.

use anyhow::Context;
use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::bulk::{BulkJob, BulkScheduler};
use super::cache::{CacheLookup, CacheStore, Fingerprint, FlightSource, MemoryStore, ResponseCache};
use super::classifier::ContentClassifier;
use super::config::ProxyConfig;
use super::domain_policy::{DomainDecision, DomainPolicy};
use super::executor::FetchExecutor;
use super::intelligence::{
    BlockedLog, BlockedRecord, IntelligenceRecord, JsonlSink, RecordSink, SinkRecord,
};
use super::rate_limiter::{RateDecision, RateLimiter};
use super::stats::{ProxyStats, StatsSnapshot};
use super::transport::{ReqwestTransport, Transport};
use super::types::{ErrorKind, FetchRequest, FetchResult, ProxyError};
use crate::version;

/// Caller identity when authentication is disabled
pub const ANONYMOUS: &str = "anonymous";

/// Upper bound on a single retry delay
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bearer credentials presented by a caller
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    token: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Parse an `Authorization` header value; anything but `Bearer <token>` is ignored
    pub fn from_authorization(header: Option<&str>) -> Self {
        let token = header.and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme
                .eq_ignore_ascii_case("bearer")
                .then(|| token.trim().to_string())
                .filter(|t| !t.is_empty())
        });
        Self { token }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// Token reduced to its last four characters for logs
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub cache_reachable: bool,
    pub cache_entries: usize,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HousekeepingReport {
    pub expired_cache_entries: usize,
    pub idle_rate_windows: usize,
}

/// The transport-facing half of the pipeline
///
/// Cloned into single-flight futures, so everything it holds is shared.
#[derive(Clone)]
struct FetchTask {
    executor: FetchExecutor,
    domains: DomainPolicy,
    permits: Arc<Semaphore>,
    stats: Arc<ProxyStats>,
    classifier: ContentClassifier,
    blocked: Arc<BlockedLog>,
    sink: Option<Arc<dyn RecordSink>>,
    max_preview_bytes: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl FetchTask {
    async fn run(&self, request: FetchRequest, request_id: String, caller: String) -> FetchResult {
        let started = Instant::now();
        let mut attempt = 0u32;

        let mut result = loop {
            let result = self.execute_once(&request, &request_id).await;
            match &result.error {
                Some(error) if error.is_retryable() && attempt < self.max_retries => {
                    let delay = backoff(self.retry_backoff, attempt);
                    attempt += 1;
                    warn!(
                        "Retrying {} after {} (attempt {}/{}, backoff {:?})",
                        request.url(),
                        error,
                        attempt,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => break result,
            }
        };
        result.execution_time = started.elapsed();

        if let Some(reason) = self.refused_destination(&request, &result) {
            warn!(
                "Redirect from {} landed on blocked {}: {}",
                request.url(),
                result.final_url,
                reason
            );
            result = FetchResult::failed(
                request_id.clone(),
                &request,
                ErrorKind::DomainBlocked { reason },
                started.elapsed(),
            );
        }

        if let Some(error) = result.error.clone() {
            self.record_blocked(BlockedRecord::new(&request_id, &request, &caller, &error))
                .await;
            return result;
        }

        let classification = self.classifier.classify(
            result.status_code,
            &result.content_type,
            &result.body,
            &result.tags,
        );
        for warning in &classification.warnings {
            warn!("Classification of {}: {}", request.url(), warning);
        }
        result.content_type = classification.content_type;
        result.tags = classification.tags;
        result.metadata = classification.metadata;

        info!(
            "Fetched {} -> {} ({} bytes) in {:?}",
            request.url(),
            result.status_code.unwrap_or_default(),
            result.size_bytes,
            result.execution_time
        );

        if result.success {
            if let Some(sink) = &self.sink {
                let record = IntelligenceRecord::from_result(&request, &result, self.max_preview_bytes);
                if let Err(e) = sink.append(SinkRecord::Intelligence(record)).await {
                    warn!("Failed to store intelligence record: {}", e);
                }
            }
        }

        result
    }

    /// Policy reason when the response came from a host other than the one admitted
    fn refused_destination(&self, request: &FetchRequest, result: &FetchResult) -> Option<String> {
        if result.error.is_some() || result.final_url == request.url().as_str() {
            return None;
        }
        let final_url = match Url::parse(&result.final_url) {
            Ok(url) => url,
            Err(e) => return Some(format!("unparseable final URL '{}': {}", result.final_url, e)),
        };
        match self.domains.check(&final_url) {
            DomainDecision::Allowed => None,
            DomainDecision::Denied { reason } => Some(format!("redirect target refused: {}", reason)),
        }
    }

    async fn execute_once(&self, request: &FetchRequest, request_id: &str) -> FetchResult {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return FetchResult::failed(
                    request_id.to_string(),
                    request,
                    ErrorKind::ConnectionError {
                        message: "proxy is shutting down".to_string(),
                    },
                    Duration::ZERO,
                )
            }
        };
        let _active = self.stats.begin_transport();
        self.executor.execute(request, request_id).await
    }

    async fn record_blocked(&self, record: BlockedRecord) {
        self.blocked.push(record.clone());
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(SinkRecord::Blocked(record)).await {
                warn!("Failed to store blocked-request record: {}", e);
            }
        }
    }
}

/// `base * 2^attempt`, capped
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

/// Request-mediation pipeline
pub struct FetchProxy {
    config: ProxyConfig,
    policy: DomainPolicy,
    limiter: RateLimiter,
    cache: ResponseCache,
    task: FetchTask,
}

impl FetchProxy {
    pub fn new(
        config: ProxyConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
        sink: Option<Arc<dyn RecordSink>>,
    ) -> Self {
        let cache = ResponseCache::new(store, config.cache_ttl(), config.negative_cache_ttl());
        let policy = DomainPolicy::new(&config.security);
        let task = FetchTask {
            executor: FetchExecutor::new(transport, config.user_agents.clone()),
            domains: policy.clone(),
            permits: Arc::new(Semaphore::new(config.server.max_concurrent.max(1))),
            stats: Arc::new(ProxyStats::new()),
            classifier: ContentClassifier::new(
                config.intelligence.auto_tagging,
                config.intelligence.content_analysis,
                config.intelligence.max_parse_bytes,
            ),
            blocked: Arc::new(BlockedLog::default()),
            sink,
            max_preview_bytes: config.intelligence.max_preview_bytes,
            max_retries: config.server.max_retries,
            retry_backoff: Duration::from_millis(config.server.retry_backoff_ms),
        };

        Self {
            policy,
            limiter: RateLimiter::new(&config.rate_limit),
            cache,
            task,
            config,
        }
    }

    /// Production wiring: reqwest transport, in-memory cache, JSON-lines sink
    pub async fn from_config(config: ProxyConfig) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(DomainPolicy::new(&config.security))
            .context("Failed to create HTTP transport")?;
        let store = MemoryStore::new(config.cache.max_entries);
        let sink: Option<Arc<dyn RecordSink>> = if config.intelligence.enabled {
            let sink = JsonlSink::new(&config.intelligence.storage_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to open intelligence storage at {}",
                        config.intelligence.storage_path.display()
                    )
                })?;
            info!("Intelligence records written to {}", sink.path().display());
            Some(Arc::new(sink) as Arc<dyn RecordSink>)
        } else {
            None
        };

        Ok(Self::new(config, Arc::new(transport), Arc::new(store), sink))
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Resolve credentials to a caller identity
    pub fn authenticate(&self, credentials: &Credentials) -> Result<String, ProxyError> {
        let Some(expected) = &self.config.security.api_key else {
            return Ok(ANONYMOUS.to_string());
        };
        match credentials.token() {
            Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
                Ok(format!("key:{}", mask_token(token)))
            }
            Some(token) => {
                warn!("Rejected bearer token {}", mask_token(token));
                Err(ProxyError::Unauthenticated)
            }
            None => {
                debug!("Rejected request without bearer token");
                Err(ProxyError::Unauthenticated)
            }
        }
    }

    /// Mediate one request; failures are reported inside the result
    pub async fn fetch(&self, credentials: &Credentials, request: FetchRequest) -> FetchResult {
        let started = Instant::now();
        let result = match self.authenticate(credentials) {
            Ok(caller) => self.mediate(&caller, request, started).await,
            Err(_) => {
                let request_id = Uuid::new_v4().to_string();
                self.deny(request_id, &request, "unauthenticated", ErrorKind::Unauthenticated, started)
                    .await
            }
        };
        self.task.stats.record(&result);
        result
    }

    /// Fetch a batch under one concurrency ceiling, results in input order
    ///
    /// Authentication is checked once for the whole batch.
    pub async fn bulk_fetch(
        &self,
        credentials: &Credentials,
        requests: Vec<FetchRequest>,
        concurrency_limit: Option<usize>,
    ) -> Result<Vec<FetchResult>, ProxyError> {
        let caller = self.authenticate(credentials)?;
        let job = BulkJob::new(
            requests,
            concurrency_limit,
            self.config.bulk.default_concurrency,
            self.config.bulk.max_concurrency.min(self.config.server.max_concurrent),
            self.config.bulk.max_urls,
        )?;

        info!(
            "Bulk fetch of {} URLs with concurrency {}",
            job.len(),
            job.concurrency_limit()
        );

        let caller = caller.as_str();
        let results = BulkScheduler::run(job, |_, request| async move {
            let result = self.mediate(caller, request, Instant::now()).await;
            self.task.stats.record(&result);
            result
        })
        .await;
        Ok(results)
    }

    async fn mediate(&self, caller: &str, request: FetchRequest, started: Instant) -> FetchResult {
        let request_id = Uuid::new_v4().to_string();

        if let DomainDecision::Denied { reason } = self.policy.check(request.url()) {
            warn!("Domain blocked for {}: {}", request.url(), reason);
            return self
                .deny(request_id, &request, caller, ErrorKind::DomainBlocked { reason }, started)
                .await;
        }

        if let RateDecision::Denied { retry_after } = self.limiter.admit(caller) {
            let retry_after_secs = ceil_secs(retry_after);
            warn!(
                "Rate limit exceeded for {}, retry after {}s",
                caller, retry_after_secs
            );
            return self
                .deny(
                    request_id,
                    &request,
                    caller,
                    ErrorKind::RateLimited { retry_after_secs },
                    started,
                )
                .await;
        }

        if !(self.config.cache.enabled && request.cache_enabled()) {
            debug!("Cache bypassed for {}", request.url());
            return self.task.run(request, request_id, caller.to_string()).await;
        }

        let key = Fingerprint::compute(&request, &self.config.cache.fingerprint_headers);
        if let CacheLookup::Hit(stored) = self.cache.get(&key).await {
            debug!("Cache hit for {} ({})", request.url(), key);
            return stored.served_from_cache(request_id, &request, started.elapsed());
        }

        let task = self.task.clone();
        let flight_request = request.clone();
        let flight_caller = caller.to_string();
        let (result, source) = self
            .cache
            .get_or_fetch(key, move || {
                async move { task.run(flight_request, request_id, flight_caller).await }.boxed()
            })
            .await;

        match source {
            FlightSource::Fetched => result,
            FlightSource::Stored => result.served_from_cache(
                Uuid::new_v4().to_string(),
                &request,
                started.elapsed(),
            ),
            FlightSource::Coalesced => {
                debug!("Coalesced fetch of {}", request.url());
                self.task.stats.record_coalesced();
                let mut result = result;
                result.success = result.success_for(&request);
                result
            }
        }
    }

    async fn deny(
        &self,
        request_id: String,
        request: &FetchRequest,
        caller: &str,
        error: ErrorKind,
        started: Instant,
    ) -> FetchResult {
        self.task
            .record_blocked(BlockedRecord::new(&request_id, request, caller, &error))
            .await;
        FetchResult::failed(request_id, request, error, started.elapsed())
    }

    pub async fn health(&self) -> HealthReport {
        let cache_reachable = self.cache.ping().await.is_ok();
        let cache_entries = self.cache.len().await.unwrap_or(0);
        let status = if cache_reachable && !self.cache.is_degraded() {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        HealthReport {
            status,
            cache_reachable,
            cache_entries,
            version: version::VERSION.to_string(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.task.stats.snapshot(self.cache.is_degraded())
    }

    pub async fn clear_cache(&self, credentials: &Credentials) -> Result<usize, ProxyError> {
        self.authenticate(credentials)?;
        let cleared = self
            .cache
            .clear()
            .await
            .map_err(|e| ProxyError::CacheUnavailable(e.to_string()))?;
        info!("Cleared {} cache entries", cleared);
        Ok(cleared)
    }

    /// Purge expired cache entries and idle rate windows
    pub async fn housekeeping(&self) -> HousekeepingReport {
        let expired_cache_entries = match self.cache.purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Cache sweep failed: {}", e);
                0
            }
        };
        let idle_rate_windows = self.limiter.prune_idle(Instant::now());
        debug!(
            "Housekeeping removed {} cache entries and {} rate windows",
            expired_cache_entries, idle_rate_windows
        );
        HousekeepingReport {
            expired_cache_entries,
            idle_rate_windows,
        }
    }

    /// Most recent blocked requests, newest first
    pub fn blocked(&self, limit: usize) -> Vec<BlockedRecord> {
        self.task.blocked.recent(limit)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
