use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use super::sample::MetricSample;
use super::series::{MinuteSeries, Period, TimeSeriesPoint};
use super::window::{RollingWindow, WindowStats};

/// Endpoint label used once `max_endpoints` distinct routes are tracked.
pub const OTHER_ENDPOINT: &str = "other";

/// Sizing for the monitor's buffers.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Maximum samples in the global rolling window.
    pub window_size: usize,
    /// Maximum age of a sample in any rolling window.
    pub window_age: Duration,
    /// Maximum samples in each endpoint's rolling window.
    pub endpoint_window_size: usize,
    /// Distinct endpoints tracked before folding into [`OTHER_ENDPOINT`].
    pub max_endpoints: usize,
    /// Minutes of global history kept for analytics.
    pub history_minutes: usize,
    /// Minutes of per-endpoint history kept for analytics.
    pub endpoint_history_minutes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            window_age: Duration::from_secs(300),
            endpoint_window_size: 100,
            max_endpoints: 200,
            history_minutes: 7 * 24 * 60,
            endpoint_history_minutes: 24 * 60,
        }
    }
}

/// Per-endpoint line of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub window_requests: usize,
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
}

/// Point-in-time read of the monitor. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Milliseconds since the monitor was created.
    pub uptime: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub window_requests: usize,
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub endpoints: BTreeMap<String, EndpointSnapshot>,
}

struct EndpointState {
    total_requests: u64,
    total_errors: u64,
    window: RollingWindow,
    history: MinuteSeries,
}

impl EndpointState {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            total_requests: 0,
            total_errors: 0,
            window: RollingWindow::new(config.endpoint_window_size, config.window_age),
            history: MinuteSeries::new(config.endpoint_history_minutes),
        }
    }

    fn record(&mut self, now: Instant, sample: &MetricSample, duration_us: u64) {
        self.total_requests += 1;
        self.total_errors += u64::from(sample.is_error());
        self.window.push(now, sample);
        self.history
            .record(sample.timestamp, duration_us, sample.is_error());
    }

    fn snapshot(&mut self, now: Instant) -> EndpointSnapshot {
        let WindowStats {
            requests,
            avg_response_time,
            error_rate,
            cache_hit_rate,
        } = self.window.stats(now);
        EndpointSnapshot {
            total_requests: self.total_requests,
            total_errors: self.total_errors,
            window_requests: requests,
            avg_response_time,
            error_rate,
            cache_hit_rate,
        }
    }
}

struct MonitorState {
    total_requests: u64,
    total_errors: u64,
    window: RollingWindow,
    history: MinuteSeries,
    endpoints: HashMap<String, EndpointState>,
}

/// Rolling and lifetime request statistics, global and per endpoint.
///
/// `record` is O(1) amortized. `snapshot` is O(number of endpoints) plus
/// whatever aged-out samples it prunes.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    started: Instant,
    started_at: OffsetDateTime,
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let state = MonitorState {
            total_requests: 0,
            total_errors: 0,
            window: RollingWindow::new(config.window_size, config.window_age),
            history: MinuteSeries::new(config.history_minutes),
            endpoints: HashMap::new(),
        };
        Self {
            config,
            started: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Append one completed request.
    pub fn record(&self, sample: MetricSample) {
        let now = Instant::now();
        let duration_us = (sample.duration_ms.max(0.0) * 1000.0).round() as u64;
        let mut state = self.state.lock();

        state.total_requests += 1;
        state.total_errors += u64::from(sample.is_error());
        state.window.push(now, &sample);
        state
            .history
            .record(sample.timestamp, duration_us, sample.is_error());

        let tracked = state.endpoints.contains_key(&sample.route);
        let key = if tracked || state.endpoints.len() < self.config.max_endpoints {
            sample.route.clone()
        } else {
            OTHER_ENDPOINT.to_string()
        };
        let config = &self.config;
        state
            .endpoints
            .entry(key)
            .or_insert_with(|| EndpointState::new(config))
            .record(now, &sample, duration_us);
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        let now = Instant::now();
        let mut state = self.state.lock();

        let stats = state.window.stats(now);
        let endpoints = state
            .endpoints
            .iter_mut()
            .map(|(route, ep)| (route.clone(), ep.snapshot(now)))
            .collect();

        AggregateSnapshot {
            timestamp: OffsetDateTime::now_utc(),
            uptime: now.saturating_duration_since(self.started).as_millis() as u64,
            total_requests: state.total_requests,
            total_errors: state.total_errors,
            window_requests: stats.requests,
            avg_response_time: stats.avg_response_time,
            error_rate: stats.error_rate,
            cache_hit_rate: stats.cache_hit_rate,
            endpoints,
        }
    }

    /// Mean response time over the last `horizon`, in milliseconds.
    pub fn recent_response_time(&self, horizon: Duration) -> f64 {
        let now = Instant::now();
        self.state.lock().window.recent_mean(now, horizon)
    }

    /// Bucketed history for `period`, globally or for one endpoint.
    ///
    /// An endpoint that has never been seen yields an all-zero series.
    pub fn analytics(
        &self,
        period: Period,
        endpoint: Option<&str>,
        now: OffsetDateTime,
    ) -> Vec<TimeSeriesPoint> {
        let state = self.state.lock();
        match endpoint {
            None => state.history.points(period, now),
            Some(route) => match state.endpoints.get(route) {
                Some(ep) => ep.history.points(period, now),
                None => MinuteSeries::new(0).points(period, now),
            },
        }
    }

    /// Routes currently tracked, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.state.lock().endpoints.keys().cloned().collect();
        routes.sort();
        routes
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::CacheOutcome;
    use time::macros::datetime;

    #[tokio::test]
    async fn test_scripted_rates_are_exact() {
        let monitor = PerformanceMonitor::default();

        // 10 samples: 2 errors, 3 hits, 7 misses.
        let script = [
            (200, CacheOutcome::Hit),
            (200, CacheOutcome::Hit),
            (200, CacheOutcome::Hit),
            (500, CacheOutcome::Miss),
            (200, CacheOutcome::Miss),
            (404, CacheOutcome::Miss),
            (200, CacheOutcome::Miss),
            (200, CacheOutcome::Miss),
            (200, CacheOutcome::Miss),
            (200, CacheOutcome::Miss),
        ];
        for (i, (status, outcome)) in script.into_iter().enumerate() {
            let route = if i % 2 == 0 { "/api/terbaru" } else { "/api/detail/{slug}" };
            monitor.record(MetricSample::new(route, 10.0 * (i + 1) as f64, status, outcome));
        }

        let snap = monitor.snapshot();
        assert_eq!(snap.total_requests, 10);
        assert_eq!(snap.total_errors, 2);
        assert_eq!(snap.error_rate, 20.0);
        assert_eq!(snap.cache_hit_rate, 30.0);
        assert_eq!(snap.avg_response_time, 55.0);

        let terbaru = &snap.endpoints["/api/terbaru"];
        assert_eq!(terbaru.total_requests, 5);
        // Hits at i = 0 and 2 were both on /api/terbaru.
        assert_eq!(terbaru.cache_hit_rate, 40.0);
        let detail = &snap.endpoints["/api/detail/{slug}"];
        assert_eq!(detail.total_errors, 2);
        assert_eq!(detail.error_rate, 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_distinct_from_lifetime() {
        let monitor = PerformanceMonitor::new(MonitorConfig {
            window_age: Duration::from_secs(60),
            ..MonitorConfig::default()
        });
        monitor.record(MetricSample::new("/a", 5.0, 500, CacheOutcome::Miss));
        tokio::time::advance(Duration::from_secs(61)).await;
        monitor.record(MetricSample::new("/a", 5.0, 200, CacheOutcome::Hit));

        let snap = monitor.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.window_requests, 1);
        assert_eq!(snap.error_rate, 0.0);
        assert!(snap.uptime >= 61_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_response_time() {
        let monitor = PerformanceMonitor::default();
        monitor.record(MetricSample::new("/a", 900.0, 200, CacheOutcome::Miss));
        tokio::time::advance(Duration::from_secs(120)).await;
        monitor.record(MetricSample::new("/a", 10.0, 200, CacheOutcome::Hit));
        monitor.record(MetricSample::new("/a", 30.0, 200, CacheOutcome::Hit));

        assert_eq!(monitor.recent_response_time(Duration::from_secs(60)), 20.0);
    }

    #[tokio::test]
    async fn test_endpoint_cap_folds_into_other() {
        let monitor = PerformanceMonitor::new(MonitorConfig {
            max_endpoints: 2,
            ..MonitorConfig::default()
        });
        for route in ["/a", "/b", "/c", "/d", "/a"] {
            monitor.record(MetricSample::new(route, 1.0, 200, CacheOutcome::Bypass));
        }
        assert_eq!(monitor.endpoints(), vec!["/a", "/b", "other"]);
        let snap = monitor.snapshot();
        assert_eq!(snap.endpoints["/a"].total_requests, 2);
        assert_eq!(snap.endpoints[OTHER_ENDPOINT].total_requests, 2);
    }

    #[tokio::test]
    async fn test_analytics_by_endpoint() {
        let monitor = PerformanceMonitor::default();
        let mut sample = MetricSample::new("/api/terbaru", 40.0, 200, CacheOutcome::Miss);
        sample.timestamp = datetime!(2026-03-01 11:30:00 UTC);
        monitor.record(sample.clone());
        sample.route = "/api/search".into();
        sample.status_code = 502;
        monitor.record(sample);

        let now = datetime!(2026-03-01 11:45:00 UTC);
        let global = monitor.analytics(Period::OneDay, None, now);
        assert_eq!(global.len(), 24);
        assert_eq!(global[23].request_count, 2);
        assert_eq!(global[23].error_rate, 50.0);

        let search = monitor.analytics(Period::OneDay, Some("/api/search"), now);
        assert_eq!(search[23].request_count, 1);
        assert_eq!(search[23].error_rate, 100.0);

        let unknown = monitor.analytics(Period::OneHour, Some("/nope"), now);
        assert_eq!(unknown.len(), 12);
        assert!(unknown.iter().all(|p| p.request_count == 0));
    }
}
