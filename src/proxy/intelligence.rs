// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Intelligence records, blocked-request log and the append-only sinks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::types::{ErrorKind, FetchRequest, FetchResult};

/// Entries kept in the in-memory blocked-request ring
pub const BLOCKED_LOG_CAPACITY: usize = 1000;

const RECORD_FILE: &str = "records.jsonl";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What was learned from one successful fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelligenceRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub status: Option<u16>,
    pub size: usize,
    pub content_type: String,
    /// SHA-256 hex of the full body
    pub content_hash: String,
    pub content_preview: String,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
}

impl IntelligenceRecord {
    pub fn from_result(request: &FetchRequest, result: &FetchResult, max_preview_bytes: usize) -> Self {
        let preview_len = result.body.len().min(max_preview_bytes);
        Self {
            timestamp: Utc::now(),
            request_id: result.request_id.clone(),
            url: result.url.clone(),
            method: request.method().to_string(),
            status: result.status_code,
            size: result.size_bytes,
            content_type: result.content_type.clone(),
            content_hash: hex::encode(Sha256::digest(&result.body)),
            content_preview: String::from_utf8_lossy(&result.body[..preview_len]).into_owned(),
            tags: result.tags.clone(),
            metadata: result.metadata.clone(),
        }
    }
}

/// A refused or failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub caller: String,
    /// `DOMAIN_BLOCKED`, `RATE_LIMIT`, `UNAUTHENTICATED`, `TIMEOUT` or `ERROR`
    pub reason: String,
    pub details: String,
    pub tags: BTreeSet<String>,
}

impl BlockedRecord {
    pub fn new(
        request_id: &str,
        request: &FetchRequest,
        caller: &str,
        error: &ErrorKind,
    ) -> Self {
        let reason = match error {
            ErrorKind::RateLimited { .. }
            | ErrorKind::DomainBlocked { .. }
            | ErrorKind::Unauthenticated
            | ErrorKind::Timeout => error.code(),
            ErrorKind::ConnectionError { .. } | ErrorKind::TlsError { .. } => "ERROR",
        };
        Self {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            url: request.url().to_string(),
            method: request.method().to_string(),
            caller: caller.to_string(),
            reason: reason.to_string(),
            details: error.to_string(),
            tags: request.tags().clone(),
        }
    }
}

/// One line in the record sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SinkRecord {
    Intelligence(IntelligenceRecord),
    Blocked(BlockedRecord),
}

/// Append-only destination for records
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: SinkRecord) -> Result<(), SinkError>;
}

/// Writes one JSON document per line under a storage directory
pub struct JsonlSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    /// Create the storage directory if needed
    pub async fn new(dir: &Path) -> Result<Self, SinkError> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            path: dir.join(RECORD_FILE),
            lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn append(&self, record: SinkRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps records in memory; used when persistence is disabled and in tests
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SinkRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, record: SinkRecord) -> Result<(), SinkError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
        Ok(())
    }
}

/// Bounded ring of the most recent blocked requests
pub struct BlockedLog {
    entries: Mutex<VecDeque<BlockedRecord>>,
    capacity: usize,
}

impl Default for BlockedLog {
    fn default() -> Self {
        Self::new(BLOCKED_LOG_CAPACITY)
    }
}

impl BlockedLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(BLOCKED_LOG_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, record: BlockedRecord) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(record);
        }
    }

    /// Most recent entries first, at most `limit`
    pub fn recent(&self, limit: usize) -> Vec<BlockedRecord> {
        self.entries
            .lock()
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
