//! Per-registry-host rate-limit tracking, parsed from response headers.
//!
//! Docker Hub (and compatible registries) return `ratelimit-limit` /
//! `ratelimit-remaining` in the shape `<count>;w=<window-seconds>`, plus
//! `docker-ratelimit-source` to distinguish anonymous vs authenticated pulls.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use std::sync::Arc;

/// Rate-limit state for a single registry host.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub is_auth: bool,
    pub container_count: u32,
    pub last_updated: DateTime<Utc>,
}

/// Parse the `count;w=window` shape used by `ratelimit-limit`/`ratelimit-remaining`.
fn parse_count(header_value: &str) -> Option<u32> {
    header_value.split(';').next()?.trim().parse().ok()
}

fn parse_window_secs(header_value: &str) -> Option<i64> {
    header_value
        .split(';')
        .nth(1)?
        .trim()
        .strip_prefix("w=")?
        .parse()
        .ok()
}

/// Parse rate-limit headers from a registry response into a [`RateLimitState`].
/// Returns `None` if no rate-limit headers are present (many non-Hub registries
/// don't send them at all).
pub fn parse_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<RateLimitState> {
    let limit_header = headers.get("ratelimit-limit")?.to_str().ok()?;
    let remaining_header = headers.get("ratelimit-remaining")?.to_str().ok()?;

    let limit = parse_count(limit_header)?;
    let remaining = parse_count(remaining_header)?;
    let window_secs = parse_window_secs(limit_header).unwrap_or(21_600); // 6h default

    let is_auth = headers
        .get("docker-ratelimit-source")
        .and_then(|v| v.to_str().ok())
        .map(|v| v != "anonymous")
        .unwrap_or(false);

    Some(RateLimitState {
        limit,
        remaining,
        reset_at: now + chrono::Duration::seconds(window_secs),
        is_auth,
        container_count: 0,
        last_updated: now,
    })
}

/// Tracks rate-limit state per registry host. Cheap to clone; all clones share
/// the same map.
#[derive(Clone, Default)]
pub struct RateLimitTracker {
    states: Arc<DashMap<String, RateLimitState>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, host: &str, state: RateLimitState) {
        self.states.insert(host.to_string(), state);
    }

    pub fn get(&self, host: &str) -> Option<RateLimitState> {
        self.states.get(host).map(|r| r.clone())
    }
}
