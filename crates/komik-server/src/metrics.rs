//! Prometheus metrics for the Komik server.
//!
//! This module provides:
//! - HTTP request metrics (count, latency)
//! - Response cache metrics (hits, misses, coalesced waits, entries)
//! - Rate limiter rejections
//! - Live stream connections

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_COALESCED_TOTAL: &str = "cache_coalesced_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";

    // Rate limit metrics
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";

    // Realtime metrics
    pub const REALTIME_CONNECTIONS: &str = "realtime_connections";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics renders the handle.
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// HTTP Metrics
// =============================================================================

/// Record an HTTP request. `route` should already be a route template.
pub fn record_http_request(method: &str, route: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => route.to_string(),
        "status" => status.to_string(),
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_cache_hit(namespace: &str) {
    counter!(names::CACHE_HITS_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

pub fn record_cache_miss(namespace: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

/// A miss that waited on another request's handler instead of running its own.
pub fn record_cache_coalesced(namespace: &str) {
    counter!(names::CACHE_COALESCED_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

pub fn set_cache_entries(count: usize) {
    gauge!(names::CACHE_ENTRIES).set(count as f64);
}

pub fn record_cache_invalidations(count: usize) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL).increment(count as u64);
}

// =============================================================================
// Rate Limit Metrics
// =============================================================================

pub fn record_rate_limit_rejection(tier: &str) {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL, "tier" => tier.to_string()).increment(1);
}

// =============================================================================
// Realtime Metrics
// =============================================================================

pub fn set_realtime_connections(count: usize) {
    gauge!(names::REALTIME_CONNECTIONS).set(count as f64);
}

// =============================================================================
// Helpers
// =============================================================================

/// Normalize a raw path for requests that did not match a route.
///
/// Replaces id-like segments with `{id}` so scanners cannot blow up label
/// cardinality.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|part| if is_likely_id(part) { "{id}" } else { part })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check if a string looks like an ID (UUID, numeric, or a long slug).
fn is_likely_id(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }

    // UUID pattern (with or without dashes)
    if s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4 {
        return true;
    }
    if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }

    // Numeric ID
    if s.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // Long slug such as a comic or chapter name
    s.len() > 12 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
