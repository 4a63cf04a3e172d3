// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bounded fan-out for batches of fetch requests

use futures::stream::{self, StreamExt};
use std::future::Future;

use super::types::ProxyError;

/// A validated batch and its effective concurrency
#[derive(Debug, Clone)]
pub struct BulkJob<T> {
    items: Vec<T>,
    concurrency_limit: usize,
}

impl<T> BulkJob<T> {
    /// Clamp `requested` into `[1, ceiling]`, defaulting to `default_limit`
    pub fn new(
        items: Vec<T>,
        requested: Option<usize>,
        default_limit: usize,
        ceiling: usize,
        max_items: usize,
    ) -> Result<Self, ProxyError> {
        if items.is_empty() {
            return Err(ProxyError::InvalidBulkJob {
                reason: "at least one URL is required".to_string(),
            });
        }
        if items.len() > max_items {
            return Err(ProxyError::InvalidBulkJob {
                reason: format!("{} URLs exceeds the limit of {}", items.len(), max_items),
            });
        }

        let ceiling = ceiling.max(1);
        let concurrency_limit = requested.unwrap_or(default_limit).clamp(1, ceiling);
        Ok(Self {
            items,
            concurrency_limit,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }
}

/// Runs each item of a [`BulkJob`] through a worker, `concurrency_limit` at a time
pub struct BulkScheduler;

impl BulkScheduler {
    /// Results come back in input order. A finished item frees its slot for the
    /// next queued item immediately, regardless of where it sits in the batch.
    pub async fn run<T, R, F, Fut>(job: BulkJob<T>, worker: F) -> Vec<R>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = R>,
    {
        let total = job.items.len();
        let limit = job.concurrency_limit;

        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut completed = stream::iter(job.items.into_iter().enumerate())
            .map(|(index, item)| {
                let fut = worker(index, item);
                async move { (index, fut.await) }
            })
            .buffer_unordered(limit);

        while let Some((index, result)) = completed.next().await {
            slots[index] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }
}
