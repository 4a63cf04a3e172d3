// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-caller rate limiting over fixed minute and hour windows

use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::config::RateLimitConfig;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Counters for one caller
#[derive(Debug, Clone)]
struct RateWindow {
    minute_count: u64,
    hour_count: u64,
    minute_start: Instant,
    hour_start: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            minute_count: 0,
            hour_count: 0,
            minute_start: now,
            hour_start: now,
        }
    }

    /// Reset whichever windows have elapsed; the next window starts at `now`
    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.minute_start) >= MINUTE {
            self.minute_count = 0;
            self.minute_start = now;
        }
        if now.saturating_duration_since(self.hour_start) >= HOUR {
            self.hour_count = 0;
            self.hour_start = now;
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.minute_start) >= MINUTE
            && now.saturating_duration_since(self.hour_start) >= HOUR
    }
}

/// Fixed-window rate limiter keyed by caller
///
/// A caller may burst up to twice the threshold across a window boundary.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    per_minute: u64,
    per_hour: u64,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let enabled =
            config.enabled && config.requests_per_minute > 0 && config.requests_per_hour > 0;
        Self {
            windows: DashMap::new(),
            per_minute: config.requests_per_minute.max(0) as u64,
            per_hour: config.requests_per_hour.max(0) as u64,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check and record one request for `caller`
    pub fn admit(&self, caller: &str) -> RateDecision {
        self.admit_at(caller, Instant::now())
    }

    /// Same as [`admit`](Self::admit) against an explicit clock reading
    pub fn admit_at(&self, caller: &str, now: Instant) -> RateDecision {
        if !self.enabled {
            return RateDecision::Allowed;
        }

        // The entry guard holds the shard lock, so check and increment are atomic
        let mut window = self
            .windows
            .entry(caller.to_string())
            .or_insert_with(|| RateWindow::new(now));
        window.roll(now);

        let minute_reset = MINUTE.saturating_sub(now.saturating_duration_since(window.minute_start));
        let hour_reset = HOUR.saturating_sub(now.saturating_duration_since(window.hour_start));

        let minute_full = window.minute_count >= self.per_minute;
        let hour_full = window.hour_count >= self.per_hour;
        if minute_full || hour_full {
            let retry_after = match (minute_full, hour_full) {
                (true, true) => minute_reset.max(hour_reset),
                (false, true) => hour_reset,
                _ => minute_reset,
            };
            return RateDecision::Denied { retry_after };
        }

        window.minute_count += 1;
        window.hour_count += 1;
        RateDecision::Allowed
    }

    /// Drop windows with no activity in either period
    pub fn prune_idle(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_idle(now));
        before.saturating_sub(self.windows.len())
    }

    /// Number of callers currently tracked
    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}
