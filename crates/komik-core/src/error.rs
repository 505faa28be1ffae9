use std::time::Duration;

use thiserror::Error;

/// Errors raised by the response cache.
///
/// None of these are allowed to fail a request: callers log them and fall
/// back to treating the lookup as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid cache key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Failed to capture response body: {0}")]
    Body(String),
}

impl CacheError {
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn body(message: impl Into<String>) -> Self {
        Self::Body(message.into())
    }
}

/// A request was rejected by the sliding-window limiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded: {limit} requests per {window:?}, retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub window: Duration,
    /// Time until the oldest request in the window expires.
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Retry-after rounded up to whole seconds, as used by the HTTP header.
    pub fn retry_after_secs(&self) -> u64 {
        let millis = self.retry_after.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Errors raised while reading or composing telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Unsupported analytics period '{0}' (expected one of 1h, 6h, 24h, 7d)")]
    InvalidPeriod(String),

    #[error("Failed to compose snapshot: {0}")]
    Snapshot(String),

    #[error("Failed to serialize telemetry: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result type for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;
