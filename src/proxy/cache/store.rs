// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cache backends

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Instant;
use thiserror::Error;

use super::fingerprint::Fingerprint;
use crate::proxy::types::FetchResult;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("cache backend unreachable: {0}")]
    Unreachable(String),

    #[error("cache backend operation failed: {0}")]
    Operation(String),
}

/// A stored response and its expiry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: FetchResult,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Key-value store with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry; expired entries are never returned
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or overwrite an entry
    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove everything, returning the number of entries removed
    async fn clear(&self) -> Result<usize, StoreError>;

    /// Remove expired entries, returning the number removed
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;

    /// Liveness probe used by health reporting
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process store backed by a sharded map
pub struct MemoryStore {
    entries: DashMap<Fingerprint, CacheEntry>,
    max_entries: usize,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().inserted_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, StoreError> {
        let now = Instant::now();
        let entry = match self.entries.get(key) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        if !self.entries.contains_key(&entry.fingerprint) && self.entries.len() >= self.max_entries
        {
            let now = Instant::now();
            self.entries.retain(|_, e| !e.is_expired(now));
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let count = self.entries.len();
        self.entries.clear();
        Ok(count)
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
