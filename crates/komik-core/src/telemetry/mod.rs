//! Request telemetry: per-request samples, rolling rates, lifetime counters
//! and minute-resolution history for analytics.

mod monitor;
mod sample;
mod series;
mod window;

pub use monitor::{
    AggregateSnapshot, EndpointSnapshot, MonitorConfig, OTHER_ENDPOINT, PerformanceMonitor,
};
pub use sample::{CacheOutcome, MetricSample};
pub use series::{Period, TimeSeriesPoint};
pub use window::WindowStats;
