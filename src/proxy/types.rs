// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Core types for the fetch proxy

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// HTTP methods accepted by the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Whether a request body is sent for this method
    pub fn allows_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(ProxyError::InvalidRequest {
                reason: format!("unsupported method: {}", other),
            }),
        }
    }
}

/// A validated fetch request
///
/// Built through [`FetchRequest::builder`]; fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    url: Url,
    method: HttpMethod,
    headers: Vec<(String, String)>,
    body: Option<String>,
    timeout: Duration,
    follow_redirects: bool,
    verify_ssl: bool,
    cache_enabled: bool,
    tags: BTreeSet<String>,
    user_agent: Option<String>,
    allow_status_codes: Option<Vec<u16>>,
}

impl FetchRequest {
    /// Default per-request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn builder(url: impl Into<String>) -> FetchRequestBuilder {
        FetchRequestBuilder::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Headers in the order the caller supplied them
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup (first match wins)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn verify_ssl(&self) -> bool {
        self.verify_ssl
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn allow_status_codes(&self) -> Option<&[u16]> {
        self.allow_status_codes.as_deref()
    }

    /// Whether `status` counts as a successful response for this request
    pub fn is_allowed_status(&self, status: u16) -> bool {
        match &self.allow_status_codes {
            Some(codes) if !codes.is_empty() => codes.contains(&status),
            _ => (200..400).contains(&status),
        }
    }
}

/// Builder for [`FetchRequest`]
#[derive(Debug, Clone)]
pub struct FetchRequestBuilder {
    url: String,
    method: HttpMethod,
    headers: Vec<(String, String)>,
    body: Option<String>,
    timeout: Duration,
    follow_redirects: bool,
    verify_ssl: bool,
    cache_enabled: bool,
    tags: BTreeSet<String>,
    user_agent: Option<String>,
    cookies: Vec<(String, String)>,
    allow_status_codes: Option<Vec<u16>>,
}

impl FetchRequestBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
            timeout: FetchRequest::DEFAULT_TIMEOUT,
            follow_redirects: true,
            verify_ssl: true,
            cache_enabled: true,
            tags: BTreeSet::new(),
            user_agent: None,
            cookies: Vec::new(),
            allow_status_codes: None,
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn allow_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.allow_status_codes = Some(codes);
        self
    }

    /// Validate and freeze the request
    pub fn build(self) -> Result<FetchRequest, ProxyError> {
        let url = Url::parse(self.url.trim()).map_err(|e| ProxyError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidUrl {
                url: self.url,
                reason: format!("unsupported scheme: {}", url.scheme()),
            });
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ProxyError::InvalidUrl {
                url: self.url,
                reason: "missing host".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ProxyError::InvalidRequest {
                reason: "timeout must be positive".to_string(),
            });
        }
        if let Some((name, _)) = self
            .headers
            .iter()
            .find(|(k, _)| k.trim().is_empty() || k.contains(['\r', '\n', ':']))
        {
            return Err(ProxyError::InvalidRequest {
                reason: format!("invalid header name: {:?}", name),
            });
        }

        let mut headers = self.headers;
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            headers.push(("Cookie".to_string(), cookie));
        }

        let tags = self
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(FetchRequest {
            url,
            method: self.method,
            headers,
            body: self.body.filter(|_| self.method.allows_body()),
            timeout: self.timeout,
            follow_redirects: self.follow_redirects,
            verify_ssl: self.verify_ssl,
            cache_enabled: self.cache_enabled,
            tags,
            user_agent: self.user_agent.filter(|ua| !ua.trim().is_empty()),
            allow_status_codes: self.allow_status_codes,
        })
    }
}

/// Why a request failed or was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ErrorKind {
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    #[serde(rename_all = "camelCase")]
    RateLimited { retry_after_secs: u64 },

    #[error("Domain blocked: {reason}")]
    DomainBlocked { reason: String },

    #[error("Missing or invalid bearer token")]
    Unauthenticated,

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {message}")]
    ConnectionError { message: String },

    #[error("TLS verification failed: {message}")]
    TlsError { message: String },
}

impl ErrorKind {
    /// Whether repeating the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RateLimited { .. } | ErrorKind::ConnectionError { .. }
        )
    }

    /// Admission denials, as opposed to transport failures
    pub fn is_admission_denial(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited { .. } | ErrorKind::DomainBlocked { .. } | ErrorKind::Unauthenticated
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ErrorKind::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Short stable label used in stats and blocked-request records
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited { .. } => "RATE_LIMIT",
            ErrorKind::DomainBlocked { .. } => "DOMAIN_BLOCKED",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ConnectionError { .. } => "CONNECTION_ERROR",
            ErrorKind::TlsError { .. } => "TLS_ERROR",
        }
    }
}

/// Outcome of one fetch request
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub request_id: String,
    pub url: String,
    pub final_url: String,
    pub status_code: Option<u16>,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub size_bytes: usize,
    pub execution_time: Duration,
    pub cache_hit: bool,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub error: Option<ErrorKind>,
    /// Status in the caller's allow list and no error
    pub success: bool,
}

impl FetchResult {
    /// Result for a request that never reached the transport, or whose transport call failed
    pub fn failed(
        request_id: String,
        request: &FetchRequest,
        error: ErrorKind,
        execution_time: Duration,
    ) -> Self {
        Self {
            request_id,
            url: request.url().to_string(),
            final_url: request.url().to_string(),
            status_code: None,
            content_type: String::new(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
            size_bytes: 0,
            execution_time,
            cache_hit: false,
            tags: request.tags().clone(),
            metadata: BTreeMap::new(),
            error: Some(error),
            success: false,
        }
    }

    /// Whether this outcome counts as a success under `request`'s allow list
    pub fn success_for(&self, request: &FetchRequest) -> bool {
        self.error.is_none()
            && self
                .status_code
                .map_or(false, |status| request.is_allowed_status(status))
    }

    /// Copy of a stored result as served to `request` from cache
    pub fn served_from_cache(
        &self,
        request_id: String,
        request: &FetchRequest,
        execution_time: Duration,
    ) -> Self {
        let mut result = self.clone();
        result.request_id = request_id;
        result.cache_hit = true;
        result.execution_time = execution_time;
        result.tags.extend(request.tags().iter().cloned());
        result.success = result.success_for(request);
        result
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Errors raised before a request enters the pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProxyError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid bulk job: {reason}")]
    InvalidBulkJob { reason: String },

    #[error("Missing or invalid bearer token")]
    Unauthenticated,

    #[error("Cache backend unavailable: {0}")]
    CacheUnavailable(String),
}
