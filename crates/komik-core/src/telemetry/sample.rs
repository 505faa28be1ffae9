use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How the cache layer handled a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// The cache did not take part (non-GET, uncached route, oversized body).
    Bypass,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

impl std::fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub route: String,
    pub duration_ms: f64,
    pub status_code: u16,
    pub cache_outcome: CacheOutcome,
}

impl MetricSample {
    pub fn new(
        route: impl Into<String>,
        duration_ms: f64,
        status_code: u16,
        cache_outcome: CacheOutcome,
    ) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            route: route.into(),
            duration_ms,
            status_code,
            cache_outcome,
        }
    }

    /// Status 400 and above counts as an error.
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}
