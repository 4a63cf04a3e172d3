// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Single outbound fetch with timeout and header injection

use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::transport::{OutboundRequest, Transport, TransportError};
use super::types::{ErrorKind, FetchRequest, FetchResult};

/// Fallback when the rotation list is empty
const DEFAULT_USER_AGENT: &str = concat!("webfetch-proxy/", env!("CARGO_PKG_VERSION"));

/// Wraps the transport with per-request timeout and error mapping
///
/// Never retries; one call to [`execute`](Self::execute) is at most one
/// transport call.
#[derive(Clone)]
pub struct FetchExecutor {
    transport: Arc<dyn Transport>,
    user_agents: Arc<Vec<String>>,
}

impl FetchExecutor {
    pub fn new(transport: Arc<dyn Transport>, user_agents: Vec<String>) -> Self {
        Self {
            transport,
            user_agents: Arc::new(user_agents),
        }
    }

    pub async fn execute(&self, request: &FetchRequest, request_id: &str) -> FetchResult {
        let started = Instant::now();
        let outbound = self.prepare(request, request_id);

        debug!(
            "Fetching {} {} (request {})",
            outbound.method, outbound.url, request_id
        );

        let outcome = tokio::time::timeout(request.timeout(), self.transport.send(&outbound)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let kind = error_kind(e);
                warn!("Fetch of {} failed: {}", request.url(), kind);
                return FetchResult::failed(request_id.to_string(), request, kind, started.elapsed());
            }
            Err(_) => {
                warn!(
                    "Fetch of {} timed out after {:?}",
                    request.url(),
                    request.timeout()
                );
                return FetchResult::failed(
                    request_id.to_string(),
                    request,
                    ErrorKind::Timeout,
                    started.elapsed(),
                );
            }
        };

        let content_type = response
            .headers
            .get("content-type")
            .map(|ct| strip_parameters(ct))
            .unwrap_or_default();
        let size_bytes = response.body.len();

        FetchResult {
            request_id: request_id.to_string(),
            url: request.url().to_string(),
            final_url: response.final_url,
            status_code: Some(response.status),
            content_type,
            headers: response.headers,
            body: response.body,
            size_bytes,
            execution_time: started.elapsed(),
            cache_hit: false,
            tags: request.tags().clone(),
            metadata: Default::default(),
            error: None,
            success: request.is_allowed_status(response.status),
        }
    }

    fn prepare(&self, request: &FetchRequest, request_id: &str) -> OutboundRequest {
        let mut headers: Vec<(String, String)> = request
            .headers()
            .iter()
            .filter(|(name, _)| {
                !name.eq_ignore_ascii_case("user-agent") && !name.eq_ignore_ascii_case("x-request-id")
            })
            .cloned()
            .collect();

        let user_agent = request
            .user_agent()
            .map(str::to_string)
            .or_else(|| request.header("user-agent").map(str::to_string))
            .unwrap_or_else(|| self.pick_user_agent());
        headers.push(("User-Agent".to_string(), user_agent));
        headers.push(("X-Request-ID".to_string(), request_id.to_string()));

        OutboundRequest {
            method: request.method(),
            url: request.url().clone(),
            headers,
            body: request.body().map(str::to_string),
            timeout: request.timeout(),
            follow_redirects: request.follow_redirects(),
            verify_ssl: request.verify_ssl(),
        }
    }

    fn pick_user_agent(&self) -> String {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

fn error_kind(err: TransportError) -> ErrorKind {
    match err {
        TransportError::Timeout => ErrorKind::Timeout,
        TransportError::Tls(message) => ErrorKind::TlsError { message },
        TransportError::RedirectBlocked(reason) => ErrorKind::DomainBlocked { reason },
        TransportError::Connect(message) | TransportError::Other(message) => {
            ErrorKind::ConnectionError { message }
        }
    }
}

/// `text/html; charset=utf-8` -> `text/html`
pub fn strip_parameters(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
