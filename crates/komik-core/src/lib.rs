pub mod cache;
pub mod error;
pub mod rate_limit;
pub mod telemetry;

pub use cache::{CacheStats, CacheStore, EvictionPolicy, KeyPattern, fingerprint};
pub use error::{CacheError, CacheResult, RateLimitExceeded, TelemetryError};
pub use rate_limit::{Admission, RateLimitTier, RateLimiter, Tier};
pub use telemetry::{
    AggregateSnapshot, CacheOutcome, MetricSample, Period, PerformanceMonitor, TimeSeriesPoint,
};
