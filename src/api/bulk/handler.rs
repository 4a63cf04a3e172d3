// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bulk fetch API endpoint handler

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::request::BulkApiRequest;
use super::response::BulkApiResponse;
use crate::api::errors::ApiErrorResponse;
use crate::api::fetch::handler::{credentials_from, reject_body};
use crate::api::fetch::FetchApiResponse;
use crate::api::http_server::AppState;

/// POST /fetch/bulk - Fetch a batch of URLs
///
/// # Request
/// - `urls`: URLs to fetch (required, 1 to `bulk.max_urls`)
/// - `concurrentLimit`: Parallel fetches, clamped to the server ceiling
/// - `method`, `commonHeaders`, `timeout`, `userAgent`, `tags`
/// - `followRedirects`, `verifySsl`, `cacheEnabled`: default true
///
/// # Response
/// - `totalUrls`, `successful`, `failed`
/// - `results`: One item per URL in request order. Invalid URLs, denials
///   and transport failures are reported in the item, not as a batch error.
///
/// # Errors
/// - 400 Bad Request: Empty or oversized batch, bad timeout
/// - 401 Unauthorized: Missing or wrong bearer token
pub async fn bulk_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BulkApiRequest>, JsonRejection>,
) -> Result<Json<BulkApiResponse>, ApiErrorResponse> {
    let Json(request) = body.map_err(reject_body)?;
    let credentials = credentials_from(&headers);
    let proxy = &state.proxy;

    proxy.authenticate(&credentials)?;
    request.validate(proxy.config().bulk.max_urls)?;
    debug!("Bulk request for {} URLs", request.urls.len());

    let prepared = request.to_fetch_requests(proxy.config().request_timeout())?;

    let mut slots: Vec<Option<FetchApiResponse>> = Vec::with_capacity(prepared.len());
    let mut valid = Vec::new();
    let mut valid_slots = Vec::new();
    for (index, item) in prepared.into_iter().enumerate() {
        match item {
            Ok(fetch_request) => {
                valid.push(fetch_request);
                valid_slots.push(index);
                slots.push(None);
            }
            Err(e) => slots.push(Some(FetchApiResponse::invalid(
                Uuid::new_v4().to_string(),
                request.urls[index].clone(),
                e.to_string(),
            ))),
        }
    }

    if !valid.is_empty() {
        let results = proxy
            .bulk_fetch(&credentials, valid, request.concurrent_limit)
            .await?;
        for (index, result) in valid_slots.into_iter().zip(results) {
            slots[index] = Some(FetchApiResponse::from(result));
        }
    }

    let response = BulkApiResponse::new(slots.into_iter().flatten().collect());
    info!(
        "Bulk fetch complete: {} of {} succeeded",
        response.successful, response.total_urls
    );
    Ok(Json(response))
}
