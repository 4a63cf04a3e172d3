// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Mediating HTTP fetch proxy
//!
//! Admission control, a single-flight response cache, bounded bulk
//! scheduling and content classification in front of an outbound transport.

pub mod bulk;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod domain_policy;
pub mod executor;
pub mod intelligence;
pub mod rate_limiter;
pub mod service;
pub mod stats;
pub mod transport;
pub mod types;

pub use bulk::{BulkJob, BulkScheduler};
pub use cache::{CacheEntry, CacheLookup, CacheStore, Fingerprint, MemoryStore, ResponseCache, StoreError};
pub use classifier::{Classification, ContentClassifier};
pub use config::{ConfigError, DomainMatch, ProxyConfig};
pub use domain_policy::{DomainDecision, DomainPolicy};
pub use executor::FetchExecutor;
pub use intelligence::{
    BlockedLog, BlockedRecord, IntelligenceRecord, JsonlSink, MemorySink, RecordSink, SinkError,
    SinkRecord,
};
pub use rate_limiter::{RateDecision, RateLimiter};
pub use service::{Credentials, FetchProxy, HealthReport, HealthStatus, HousekeepingReport};
pub use stats::{ProxyStats, StatsSnapshot};
pub use transport::{OutboundRequest, ReqwestTransport, Transport, TransportError, TransportResponse};
pub use types::{ErrorKind, FetchRequest, FetchRequestBuilder, FetchResult, HttpMethod, ProxyError};
