// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Fetch API response types

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::proxy::{ErrorKind, FetchResult};

/// How `content` is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Utf8,
    Base64,
}

/// Error attached to a per-item response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    /// `rateLimited`, `domainBlocked`, `unauthenticated`, `timeout`,
    /// `connectionError`, `tlsError` or `invalidRequest`
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    pub retryable: bool,
}

impl From<&ErrorKind> for ItemError {
    fn from(kind: &ErrorKind) -> Self {
        let tag = serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(str::to_string))
            .unwrap_or_else(|| kind.code().to_lowercase());
        Self {
            kind: tag,
            message: kind.to_string(),
            retry_after_secs: kind.retry_after_secs(),
            retryable: kind.is_retryable(),
        }
    }
}

/// Response body for POST /fetch and each bulk item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchApiResponse {
    pub request_id: String,
    pub url: String,
    pub final_url: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub content: String,
    pub content_encoding: ContentEncoding,
    pub size_bytes: usize,
    pub execution_time_ms: u64,
    pub cache_hit: bool,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub error: Option<ItemError>,
}

impl From<FetchResult> for FetchApiResponse {
    fn from(result: FetchResult) -> Self {
        let (content, content_encoding) = match std::str::from_utf8(&result.body) {
            Ok(text) => (text.to_string(), ContentEncoding::Utf8),
            Err(_) => (
                base64::engine::general_purpose::STANDARD.encode(&result.body),
                ContentEncoding::Base64,
            ),
        };

        Self {
            request_id: result.request_id,
            url: result.url,
            final_url: result.final_url,
            success: result.success,
            status_code: result.status_code,
            content_type: result.content_type,
            headers: result.headers,
            content,
            content_encoding,
            size_bytes: result.size_bytes,
            execution_time_ms: result.execution_time.as_millis() as u64,
            cache_hit: result.cache_hit,
            tags: result.tags,
            metadata: result.metadata,
            error: result.error.as_ref().map(ItemError::from),
        }
    }
}

impl FetchApiResponse {
    /// Item for a URL that failed validation before reaching the pipeline
    pub fn invalid(request_id: String, url: String, message: String) -> Self {
        Self {
            request_id,
            final_url: url.clone(),
            url,
            success: false,
            status_code: None,
            content_type: String::new(),
            headers: BTreeMap::new(),
            content: String::new(),
            content_encoding: ContentEncoding::Utf8,
            size_bytes: 0,
            execution_time_ms: 0,
            cache_hit: false,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            error: Some(ItemError {
                kind: "invalidRequest".to_string(),
                message,
                retry_after_secs: None,
                retryable: false,
            }),
        }
    }
}
