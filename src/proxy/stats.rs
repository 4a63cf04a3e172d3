// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request counters for the stats endpoint

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::types::FetchResult;

/// Point-in-time view of [`ProxyStats`]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub request_count: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub coalesced_count: u64,
    /// Share of requests per non-success outcome (status code or error kind)
    pub error_rate_by_status: BTreeMap<String, f64>,
    pub active_concurrency: usize,
    pub blocked_count: u64,
    pub cache_degraded: bool,
}

#[derive(Default)]
pub struct ProxyStats {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    blocked: AtomicU64,
    active: AtomicUsize,
    outcomes: Mutex<BTreeMap<String, u64>>,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one completed request
    pub fn record(&self, result: &FetchResult) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if result.cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(error) = &result.error {
            if error.is_admission_denial() {
                self.blocked.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Some(label) = outcome_label(result) {
            if let Ok(mut outcomes) = self.outcomes.lock() {
                *outcomes.entry(label).or_insert(0) += 1;
            }
        }
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a transport call as started; the guard marks it finished
    pub fn begin_transport(self: &Arc<Self>) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveGuard {
            stats: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, cache_degraded: bool) -> StatsSnapshot {
        let request_count = self.requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let rate = |n: u64| {
            if request_count == 0 {
                0.0
            } else {
                n as f64 / request_count as f64
            }
        };

        let error_rate_by_status: BTreeMap<String, f64> = self
            .outcomes
            .lock()
            .map(|outcomes| {
                outcomes
                    .iter()
                    .map(|(label, count)| (label.clone(), rate(*count)))
                    .collect()
            })
            .unwrap_or_default();

        StatsSnapshot {
            request_count,
            cache_hits,
            cache_hit_rate: rate(cache_hits),
            coalesced_count: self.coalesced.load(Ordering::Relaxed),
            error_rate_by_status,
            active_concurrency: self.active(),
            blocked_count: self.blocked.load(Ordering::Relaxed),
            cache_degraded,
        }
    }
}

pub struct ActiveGuard {
    stats: Arc<ProxyStats>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// `None` for successes; otherwise the status code or error code
fn outcome_label(result: &FetchResult) -> Option<String> {
    if result.success {
        return None;
    }
    match (&result.error, result.status_code) {
        (Some(error), _) => Some(error.code().to_string()),
        (None, Some(status)) => Some(status.to_string()),
        (None, None) => Some("UNKNOWN".to_string()),
    }
}
