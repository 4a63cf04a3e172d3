// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Host allow/deny evaluation for outbound URLs

use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

use super::config::{DomainMatch, SecurityConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainDecision {
    Allowed,
    Denied { reason: String },
}

impl DomainDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, DomainDecision::Allowed)
    }

    fn denied(reason: impl Into<String>) -> Self {
        DomainDecision::Denied {
            reason: reason.into(),
        }
    }
}

/// Allow/deny lists over normalized host rules
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    allowed: Vec<String>,
    blocked: Vec<String>,
    mode: DomainMatch,
}

impl DomainPolicy {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            allowed: normalize_rules(&config.allowed_domains),
            blocked: normalize_rules(&config.blocked_domains),
            mode: config.domain_match,
        }
    }

    pub fn check(&self, url: &Url) -> DomainDecision {
        if !matches!(url.scheme(), "http" | "https") {
            return DomainDecision::denied(format!("scheme '{}' not permitted", url.scheme()));
        }
        let Some(host) = url.host() else {
            return DomainDecision::denied("URL has no host");
        };
        let name = normalize_host(&host);
        if name.is_empty() {
            return DomainDecision::denied("URL has no host");
        }

        // A configured allow-list is authoritative
        if !self.allowed.is_empty() {
            return if self.matches_any(&self.allowed, &name) {
                DomainDecision::Allowed
            } else {
                DomainDecision::denied(format!("{} is not in the allow-list", name))
            };
        }

        if self.matches_any(&self.blocked, &name) {
            return DomainDecision::denied(format!("{} is deny-listed", name));
        }
        if is_internal_host(&host, &name) {
            return DomainDecision::denied(format!("{} is a local or private address", name));
        }
        DomainDecision::Allowed
    }

    fn matches_any(&self, rules: &[String], host: &str) -> bool {
        rules.iter().any(|rule| match self.mode {
            DomainMatch::Exact => host == rule,
            DomainMatch::Suffix => {
                host == rule
                    || (host.len() > rule.len()
                        && host.ends_with(rule.as_str())
                        && host.as_bytes()[host.len() - rule.len() - 1] == b'.')
            }
        })
    }
}

fn normalize_rules(rules: &[String]) -> Vec<String> {
    rules
        .iter()
        .map(|r| {
            r.trim()
                .trim_start_matches("*.")
                .trim_start_matches('.')
                .trim_end_matches('.')
                .to_lowercase()
        })
        .filter(|r| !r.is_empty())
        .collect()
}

fn normalize_host(host: &Host<&str>) -> String {
    match host {
        Host::Domain(d) => d.trim_end_matches('.').to_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => format!("[{}]", ip),
    }
}

fn is_internal_host(host: &Host<&str>, name: &str) -> bool {
    match host {
        Host::Domain(_) => name == "localhost" || name.ends_with(".localhost"),
        Host::Ipv4(ip) => is_internal_v4(ip),
        Host::Ipv6(ip) => is_internal_v6(ip),
    }
}

fn is_internal_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn is_internal_v6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_internal_v4(&mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
