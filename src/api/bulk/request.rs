// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bulk fetch API request types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::api::fetch::request::{header_list, parse_timeout};
use crate::proxy::{FetchRequest, HttpMethod, ProxyError};

/// Request body for POST /fetch/bulk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApiRequest {
    /// URLs to fetch, results come back in this order
    pub urls: Vec<String>,

    /// Concurrency for this batch, clamped to the server ceiling
    #[serde(default, alias = "concurrent_limit")]
    pub concurrent_limit: Option<usize>,

    #[serde(default)]
    pub method: HttpMethod,

    /// Headers sent with every URL, in caller order
    #[serde(
        default,
        alias = "common_headers",
        deserialize_with = "header_list::deserialize"
    )]
    pub common_headers: Vec<(String, String)>,

    #[serde(default)]
    pub timeout: Option<f64>,

    #[serde(default = "default_true", alias = "follow_redirects")]
    pub follow_redirects: bool,

    #[serde(default = "default_true", alias = "verify_ssl")]
    pub verify_ssl: bool,

    #[serde(default = "default_true", alias = "cache_enabled")]
    pub cache_enabled: bool,

    #[serde(default, alias = "user_agent")]
    pub user_agent: Option<String>,

    #[serde(default, alias = "intelligence_tags")]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl BulkApiRequest {
    /// Validate batch-level fields
    pub fn validate(&self, max_urls: usize) -> Result<(), ProxyError> {
        if self.urls.is_empty() {
            return Err(ProxyError::InvalidBulkJob {
                reason: "urls cannot be empty".to_string(),
            });
        }
        if self.urls.len() > max_urls {
            return Err(ProxyError::InvalidBulkJob {
                reason: format!("too many urls: {} (max {})", self.urls.len(), max_urls),
            });
        }
        if self.concurrent_limit == Some(0) {
            return Err(ProxyError::InvalidBulkJob {
                reason: "concurrentLimit must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// One request per URL; a URL that fails validation yields its error in place
    pub fn to_fetch_requests(
        &self,
        default_timeout: Duration,
    ) -> Result<Vec<Result<FetchRequest, ProxyError>>, ProxyError> {
        let timeout = parse_timeout(self.timeout, default_timeout)?;

        Ok(self
            .urls
            .iter()
            .map(|url| {
                let mut builder = FetchRequest::builder(url.as_str())
                    .method(self.method)
                    .headers(self.common_headers.clone())
                    .timeout(timeout)
                    .follow_redirects(self.follow_redirects)
                    .verify_ssl(self.verify_ssl)
                    .cache_enabled(self.cache_enabled)
                    .tags(self.tags.iter().cloned());
                if let Some(user_agent) = &self.user_agent {
                    builder = builder.user_agent(user_agent.clone());
                }
                builder.build()
            })
            .collect())
    }
}
