// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::proxy::{ErrorKind, ProxyError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    pub request_id: Option<String>,
    pub details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    InvalidRequest(String),
    ValidationError {
        field: String,
        message: String,
    },
    Unauthorized(String),
    Forbidden(String),
    RateLimitExceeded {
        retry_after: u64,
    },
    BadGateway(String),
    ServiceUnavailable(String),
    Timeout,
}

impl ApiError {
    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        let (error_type, message, details) = match self {
            ApiError::InvalidRequest(msg) => ("invalid_request", msg.clone(), None),
            ApiError::ValidationError { field, message } => {
                let mut details = HashMap::new();
                details.insert(
                    "field".to_string(),
                    serde_json::Value::String(field.clone()),
                );
                ("validation_error", message.clone(), Some(details))
            }
            ApiError::Unauthorized(msg) => ("unauthorized", msg.clone(), None),
            ApiError::Forbidden(msg) => ("domain_blocked", msg.clone(), None),
            ApiError::RateLimitExceeded { retry_after } => {
                let mut details = HashMap::new();
                details.insert(
                    "retryAfterSecs".to_string(),
                    serde_json::Value::Number((*retry_after).into()),
                );
                (
                    "rate_limit_exceeded",
                    "Rate limit exceeded".to_string(),
                    Some(details),
                )
            }
            ApiError::BadGateway(msg) => ("bad_gateway", msg.clone(), None),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg.clone(), None),
            ApiError::Timeout => ("timeout", "Upstream request timed out".to_string(), None),
        };

        ErrorResponse {
            error_type: error_type.to_string(),
            message,
            request_id,
            details,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidRequest(_) | ApiError::ValidationError { .. } => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::RateLimitExceeded { .. } => 429,
            ApiError::BadGateway(_) => 502,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::Timeout => 504,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::ValidationError { field, message } => {
                write!(f, "Validation error for {}: {}", field, message)
            }
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::RateLimitExceeded { retry_after } => write!(
                f,
                "Rate limit exceeded, retry after {} seconds",
                retry_after
            ),
            ApiError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::Timeout => write!(f, "Upstream request timed out"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<&ErrorKind> for ApiError {
    fn from(kind: &ErrorKind) -> Self {
        match kind {
            ErrorKind::RateLimited { retry_after_secs } => ApiError::RateLimitExceeded {
                retry_after: *retry_after_secs,
            },
            ErrorKind::DomainBlocked { reason } => ApiError::Forbidden(reason.clone()),
            ErrorKind::Unauthenticated => ApiError::Unauthorized(kind.to_string()),
            ErrorKind::Timeout => ApiError::Timeout,
            ErrorKind::ConnectionError { .. } | ErrorKind::TlsError { .. } => {
                ApiError::BadGateway(kind.to_string())
            }
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::InvalidUrl { .. } => ApiError::ValidationError {
                field: "url".to_string(),
                message: err.to_string(),
            },
            ProxyError::InvalidRequest { .. } | ProxyError::InvalidBulkJob { .. } => {
                ApiError::InvalidRequest(err.to_string())
            }
            ProxyError::Unauthenticated => ApiError::Unauthorized(err.to_string()),
            ProxyError::CacheUnavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
        }
    }
}

/// Error response wrapper carrying the request id when one exists
#[derive(Debug)]
pub struct ApiErrorResponse {
    pub error: ApiError,
    pub request_id: Option<String>,
}

impl ApiErrorResponse {
    pub fn new(error: ApiError, request_id: Option<String>) -> Self {
        Self { error, request_id }
    }
}

impl From<ApiError> for ApiErrorResponse {
    fn from(error: ApiError) -> Self {
        Self::new(error, None)
    }
}

impl From<ProxyError> for ApiErrorResponse {
    fn from(err: ProxyError) -> Self {
        Self::new(err.into(), None)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.error.to_response(self.request_id);

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimitExceeded { retry_after } = self.error {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
