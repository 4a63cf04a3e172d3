// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Fetch API request types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::proxy::{FetchRequest, HttpMethod, ProxyError};

/// Longest per-request timeout a caller may ask for
pub const MAX_TIMEOUT_SECS: f64 = 300.0;

/// Request body for POST /fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchApiRequest {
    /// Absolute http(s) URL to fetch
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Outbound headers in caller order; repeated names are kept
    #[serde(default, deserialize_with = "header_list::deserialize")]
    pub headers: Vec<(String, String)>,

    /// Request body, ignored for GET and HEAD
    #[serde(default, alias = "data")]
    pub body: Option<String>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Timeout in seconds; the server default applies when absent
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

    /// Statuses treated as success (default 200-399)
    #[serde(default, alias = "allow_status_codes")]
    pub allow_status_codes: Option<Vec<u16>>,

    #[serde(default, alias = "intelligence_tags")]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Header lists given either as a JSON object, read in document order, or as
/// an array of `[name, value]` pairs
pub mod header_list {
    use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
    use std::fmt;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(HeaderListVisitor)
    }

    struct HeaderListVisitor;

    impl<'de> Visitor<'de> for HeaderListVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object of header values or a list of [name, value] pairs")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut headers = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, String>()? {
                headers.push(entry);
            }
            Ok(headers)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut headers = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(pair) = seq.next_element::<(String, String)>()? {
                headers.push(pair);
            }
            Ok(headers)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }
}

/// Validate a caller-supplied timeout in seconds
pub fn parse_timeout(timeout: Option<f64>, default: Duration) -> Result<Duration, ProxyError> {
    match timeout {
        None => Ok(default),
        Some(secs) if secs.is_finite() && secs > 0.0 && secs <= MAX_TIMEOUT_SECS => {
            Ok(Duration::from_secs_f64(secs))
        }
        Some(secs) => Err(ProxyError::InvalidRequest {
            reason: format!(
                "timeout must be between 0 and {} seconds, got {}",
                MAX_TIMEOUT_SECS, secs
            ),
        }),
    }
}

impl FetchApiRequest {
    /// Convert into a validated [`FetchRequest`]
    pub fn into_fetch_request(self, default_timeout: Duration) -> Result<FetchRequest, ProxyError> {
        let timeout = parse_timeout(self.timeout, default_timeout)?;

        let mut builder = FetchRequest::builder(self.url)
            .method(self.method)
            .headers(self.headers)
            .timeout(timeout)
            .follow_redirects(self.follow_redirects)
            .verify_ssl(self.verify_ssl)
            .cache_enabled(self.cache_enabled)
            .tags(self.tags);

        for (name, value) in self.cookies {
            builder = builder.cookie(name, value);
        }
        if let Some(body) = self.body {
            builder = builder.body(body);
        }
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }
        if let Some(codes) = self.allow_status_codes {
            builder = builder.allow_status_codes(codes);
        }

        builder.build()
    }
}
