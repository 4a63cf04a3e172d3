// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Outbound HTTP transport

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::domain_policy::{DomainDecision, DomainPolicy};
use super::types::HttpMethod;

/// Maximum redirect hops when redirects are followed
const MAX_REDIRECTS: usize = 10;

/// A fully prepared outbound request
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub verify_ssl: bool,
}

/// Raw response from the transport
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub final_url: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("redirect blocked: {0}")]
    RedirectBlocked(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Capability to perform one HTTP exchange
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// A redirect hop refused by the domain policy
#[derive(Debug, Error)]
#[error("redirect to {url} refused: {reason}")]
struct RedirectRefused {
    url: String,
    reason: String,
}

/// Decide whether a redirect hop to `url` may be followed
///
/// `hops` counts the URLs already visited, the original one included.
fn check_redirect(domains: &DomainPolicy, url: &Url, hops: usize) -> Result<(), String> {
    if hops > MAX_REDIRECTS {
        return Err(format!("more than {} redirects", MAX_REDIRECTS));
    }
    match domains.check(url) {
        DomainDecision::Allowed => Ok(()),
        DomainDecision::Denied { reason } => Err(reason),
    }
}

fn redirect_policy(domains: DomainPolicy) -> Policy {
    Policy::custom(move |attempt| {
        let verdict = check_redirect(&domains, attempt.url(), attempt.previous().len());
        match verdict {
            Ok(()) => attempt.follow(),
            Err(reason) => {
                let url = attempt.url().to_string();
                attempt.error(RedirectRefused { url, reason })
            }
        }
    })
}

/// `reqwest`-backed transport
///
/// Redirect and certificate policies are fixed per client, so one client is
/// kept for each combination. Every followed hop is re-checked against the
/// domain policy.
pub struct ReqwestTransport {
    follow_verify: Client,
    follow_noverify: Client,
    manual_verify: Client,
    manual_noverify: Client,
}

impl ReqwestTransport {
    pub fn new(domains: DomainPolicy) -> Result<Self, TransportError> {
        Ok(Self {
            follow_verify: build_client(Some(domains.clone()), true)?,
            follow_noverify: build_client(Some(domains), false)?,
            manual_verify: build_client(None, true)?,
            manual_noverify: build_client(None, false)?,
        })
    }

    fn client(&self, follow_redirects: bool, verify_ssl: bool) -> &Client {
        match (follow_redirects, verify_ssl) {
            (true, true) => &self.follow_verify,
            (true, false) => &self.follow_noverify,
            (false, true) => &self.manual_verify,
            (false, false) => &self.manual_noverify,
        }
    }
}

/// `redirects` is the policy applied to followed hops, `None` disables following
fn build_client(redirects: Option<DomainPolicy>, verify_ssl: bool) -> Result<Client, TransportError> {
    let policy = match redirects {
        Some(domains) => redirect_policy(domains),
        None => Policy::none(),
    };
    Client::builder()
        .redirect(policy)
        .danger_accept_invalid_certs(!verify_ssl)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {}", e)))
}

fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

/// Map a reqwest failure onto the transport error kinds
fn classify_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }

    let mut chain = Vec::new();
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(refused) = cause.downcast_ref::<RedirectRefused>() {
            return TransportError::RedirectBlocked(refused.to_string());
        }
        chain.push(cause.to_string());
        source = cause.source();
    }
    let detail = chain.last().cloned().unwrap_or_else(|| err.to_string());
    let lowered = chain.join(" ").to_lowercase();

    if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl") {
        TransportError::Tls(detail)
    } else if err.is_connect() || err.is_request() {
        TransportError::Connect(detail)
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client(request.follow_redirects, request.verify_ssl)
            .request(reqwest_method(request.method), request.url.clone())
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
        }

        let body = response.bytes().await.map_err(classify_error)?;

        Ok(TransportResponse {
            status,
            headers,
            final_url,
            body,
        })
    }
}
