// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Fetch API endpoint handler

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    Json,
};
use tracing::{debug, info, warn};

use super::request::FetchApiRequest;
use super::response::FetchApiResponse;
use crate::api::errors::{ApiError, ApiErrorResponse};
use crate::api::http_server::AppState;
use crate::proxy::Credentials;

/// Bearer credentials from the `Authorization` header
pub fn credentials_from(headers: &HeaderMap) -> Credentials {
    Credentials::from_authorization(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    )
}

/// Map a malformed JSON body to a 400
pub fn reject_body(rejection: JsonRejection) -> ApiErrorResponse {
    warn!("Rejected request body: {}", rejection.body_text());
    ApiError::InvalidRequest(rejection.body_text()).into()
}

/// POST /fetch - Fetch one URL through the proxy
///
/// # Request
/// - `url`: Absolute http(s) URL (required)
/// - `method`: GET, POST, PUT, PATCH, DELETE, HEAD or OPTIONS (default GET)
/// - `headers`, `body`, `cookies`, `userAgent`
/// - `timeout`: Seconds (default from server config)
/// - `followRedirects`, `verifySsl`, `cacheEnabled`: default true
/// - `allowStatusCodes`: Statuses counted as success (default 200-399)
/// - `tags`: Caller tags carried onto the result
///
/// # Errors
/// - 400 Bad Request: Malformed body, URL or timeout
/// - 401 Unauthorized: Missing or wrong bearer token
/// - 403 Forbidden: Domain blocked
/// - 429 Too Many Requests: Rate limited, with `Retry-After`
/// - 502 Bad Gateway: Connection or TLS failure
/// - 504 Gateway Timeout: Upstream timed out
pub async fn fetch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FetchApiRequest>, JsonRejection>,
) -> Result<Json<FetchApiResponse>, ApiErrorResponse> {
    let Json(request) = body.map_err(reject_body)?;
    let credentials = credentials_from(&headers);
    state.proxy.authenticate(&credentials)?;
    debug!("Fetch request: {} {}", request.method, request.url);

    let fetch_request = request.into_fetch_request(state.proxy.config().request_timeout())?;
    let result = state.proxy.fetch(&credentials, fetch_request).await;

    if let Some(kind) = &result.error {
        return Err(ApiErrorResponse::new(
            ApiError::from(kind),
            Some(result.request_id.clone()),
        ));
    }

    info!(
        "Fetch complete: {} -> {:?} in {}ms (cache hit: {})",
        result.url,
        result.status_code,
        result.execution_time.as_millis(),
        result.cache_hit
    );

    Ok(Json(FetchApiResponse::from(result)))
}
