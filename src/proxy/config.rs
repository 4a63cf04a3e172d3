// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the fetch proxy
//!
//! Values come from defaults, an optional TOML file, then `WEBFETCH_*`
//! environment variables. Everything is validated once at startup.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors, all raised at load time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub bulk: BulkConfig,
    pub intelligence: IntelligenceConfig,
    /// User-Agent values rotated across outbound requests
    pub user_agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Global ceiling on concurrent outbound transport calls
    pub max_concurrent: usize,
    /// Default timeout applied when a request does not specify one
    pub request_timeout_secs: u64,
    /// Retries for retryable transport failures (0 = none)
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Interval of the background cache/rate-window sweep
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// TTL for cached transport failures; 0 disables negative caching
    pub negative_ttl_secs: u64,
    pub max_entries: usize,
    /// Request headers that participate in the cache fingerprint
    pub fingerprint_headers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainMatch {
    /// Host must equal the rule
    Exact,
    /// Host equals the rule or is a subdomain of it
    Suffix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Bearer token required on consuming endpoints; `None` disables auth
    pub api_key: Option<String>,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub domain_match: DomainMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Zero or negative disables rate limiting
    pub requests_per_minute: i64,
    /// Zero or negative disables rate limiting
    pub requests_per_hour: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkConfig {
    /// Ceiling applied to the caller's requested concurrency
    pub max_concurrency: usize,
    pub default_concurrency: usize,
    pub max_urls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntelligenceConfig {
    pub enabled: bool,
    /// Directory holding the JSON-lines record file
    pub storage_path: PathBuf,
    /// Derive tags from content type and status
    pub auto_tagging: bool,
    /// Extract HTML metadata
    pub content_analysis: bool,
    /// Bytes of body copied into each intelligence record
    pub max_preview_bytes: usize,
    /// Bytes of HTML handed to the metadata parser
    pub max_parse_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            bulk: BulkConfig::default(),
            intelligence: IntelligenceConfig::default(),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15".to_string(),
            ],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_concurrent: 100,
            request_timeout_secs: 30,
            max_retries: 0,
            retry_backoff_ms: 200,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            negative_ttl_secs: 0,
            max_entries: 10_000,
            fingerprint_headers: vec!["accept".to_string(), "accept-language".to_string()],
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            domain_match: DomainMatch::Suffix,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            requests_per_hour: 1000,
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 20,
            default_concurrency: 5,
            max_urls: 100,
        }
    }
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_path: PathBuf::from("intelligence"),
            auto_tagging: true,
            content_analysis: true,
            max_preview_bytes: 10_000,
            max_parse_bytes: 256 * 1024,
        }
    }
}

impl ProxyConfig {
    /// Load defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file; unknown keys are rejected
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `WEBFETCH_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_var("WEBFETCH_HOST") {
            self.server.host = v;
        }
        env_parse("WEBFETCH_PORT", &mut self.server.port)?;
        env_parse("WEBFETCH_MAX_CONCURRENT", &mut self.server.max_concurrent)?;
        env_parse("WEBFETCH_TIMEOUT_SECS", &mut self.server.request_timeout_secs)?;
        env_parse("WEBFETCH_MAX_RETRIES", &mut self.server.max_retries)?;

        if let Some(v) = env_var("WEBFETCH_CACHE_ENABLED") {
            self.cache.enabled = parse_bool("WEBFETCH_CACHE_ENABLED", &v)?;
        }
        env_parse("WEBFETCH_CACHE_TTL_SECS", &mut self.cache.ttl_secs)?;
        env_parse("WEBFETCH_NEGATIVE_CACHE_TTL_SECS", &mut self.cache.negative_ttl_secs)?;
        env_parse("WEBFETCH_CACHE_MAX_ENTRIES", &mut self.cache.max_entries)?;

        if let Some(v) = env_var("WEBFETCH_API_KEY") {
            self.security.api_key = Some(v);
        }
        if let Some(v) = env_var("WEBFETCH_ALLOWED_DOMAINS") {
            self.security.allowed_domains = split_list(&v);
        }
        if let Some(v) = env_var("WEBFETCH_BLOCKED_DOMAINS") {
            self.security.blocked_domains = split_list(&v);
        }
        if let Some(v) = env_var("WEBFETCH_DOMAIN_MATCH") {
            self.security.domain_match = match v.to_lowercase().as_str() {
                "exact" => DomainMatch::Exact,
                "suffix" => DomainMatch::Suffix,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "WEBFETCH_DOMAIN_MATCH".to_string(),
                        value: v,
                    })
                }
            };
        }

        if let Some(v) = env_var("WEBFETCH_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_bool("WEBFETCH_RATE_LIMIT_ENABLED", &v)?;
        }
        env_parse("WEBFETCH_RATE_LIMIT_PER_MINUTE", &mut self.rate_limit.requests_per_minute)?;
        env_parse("WEBFETCH_RATE_LIMIT_PER_HOUR", &mut self.rate_limit.requests_per_hour)?;

        env_parse("WEBFETCH_BULK_MAX_CONCURRENCY", &mut self.bulk.max_concurrency)?;
        env_parse("WEBFETCH_BULK_MAX_URLS", &mut self.bulk.max_urls)?;

        if let Some(v) = env_var("WEBFETCH_INTELLIGENCE_ENABLED") {
            self.intelligence.enabled = parse_bool("WEBFETCH_INTELLIGENCE_ENABLED", &v)?;
        }
        if let Some(v) = env_var("WEBFETCH_INTELLIGENCE_PATH") {
            self.intelligence.storage_path = PathBuf::from(v);
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "server.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.bulk.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "bulk.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.bulk.max_concurrency > self.server.max_concurrent {
            return Err(ConfigError::Invalid(format!(
                "bulk.max_concurrency ({}) exceeds server.max_concurrent ({})",
                self.bulk.max_concurrency, self.server.max_concurrent
            )));
        }
        if self.bulk.default_concurrency == 0 || self.bulk.max_urls == 0 {
            return Err(ConfigError::Invalid(
                "bulk.default_concurrency and bulk.max_urls must be at least 1".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1 when caching is enabled".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache.ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.user_agents.iter().any(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "user_agents must not contain empty entries".to_string(),
            ));
        }
        if let Some(key) = &self.security.api_key {
            if key.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "security.api_key must not be empty when set".to_string(),
                ));
            }
        }
        for rule in self
            .security
            .allowed_domains
            .iter()
            .chain(self.security.blocked_domains.iter())
        {
            validate_domain_rule(rule)?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// `None` when negative caching is disabled
    pub fn negative_cache_ttl(&self) -> Option<Duration> {
        (self.cache.negative_ttl_secs > 0).then(|| Duration::from_secs(self.cache.negative_ttl_secs))
    }

    /// Whether a bearer token is required
    pub fn auth_required(&self) -> bool {
        self.security.api_key.is_some()
    }

    /// Copy safe to expose over the API
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        if config.security.api_key.is_some() {
            config.security.api_key = Some("***REDACTED***".to_string());
        }
        config
    }
}

fn validate_domain_rule(rule: &str) -> Result<(), ConfigError> {
    let trimmed = rule.trim().trim_start_matches("*.").trim_start_matches('.');
    let valid = !trimmed.is_empty()
        && !trimmed.contains(['/', ':', ' ', '@', '?', '#'])
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '[' | ']'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("malformed domain rule: {:?}", rule)))
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Some(v) = env_var(key) {
        *target = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: v,
        })?;
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
