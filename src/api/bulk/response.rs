// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bulk fetch API response types

use serde::{Deserialize, Serialize};

use crate::api::fetch::FetchApiResponse;

/// Response body for POST /fetch/bulk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApiResponse {
    pub total_urls: usize,
    pub successful: usize,
    pub failed: usize,
    /// One item per requested URL, in request order
    pub results: Vec<FetchApiResponse>,
}

impl BulkApiResponse {
    pub fn new(results: Vec<FetchApiResponse>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total_urls: results.len(),
            failed: results.len() - successful,
            successful,
            results,
        }
    }
}
