// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the webfetch proxy

/// Semantic version number
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name reported by the info endpoint
pub const SERVICE_NAME: &str = "webfetch-proxy";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "single-fetch",
    "bulk-fetch",
    "response-cache",
    "single-flight",
    "domain-policy",
    "rate-limiting",
    "bearer-auth",
    "content-classification",
    "intelligence-records",
    "blocked-request-log",
    "user-agent-rotation",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("{} {}", SERVICE_NAME, VERSION)
}

/// Get full version info for API responses
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "features": FEATURES,
    })
}
