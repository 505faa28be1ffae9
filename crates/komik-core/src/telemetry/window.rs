use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::sample::{CacheOutcome, MetricSample};

#[derive(Debug, Clone, Copy)]
struct Timed {
    at: Instant,
    duration_us: u64,
    error: bool,
    outcome: CacheOutcome,
}

/// Rates over the rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    pub requests: usize,
    /// Mean duration in milliseconds.
    pub avg_response_time: f64,
    /// Percentage of requests with status >= 400.
    pub error_rate: f64,
    /// Hits as a percentage of hits + misses. Bypassed requests are ignored.
    pub cache_hit_rate: f64,
}

/// Bounded ring of recent samples with running sums.
///
/// Samples leave either when the ring is full or when they are older than
/// `max_age`. Sums are kept in integer microseconds so repeated add/remove
/// does not drift.
#[derive(Debug)]
pub(crate) struct RollingWindow {
    samples: VecDeque<Timed>,
    capacity: usize,
    max_age: Duration,
    sum_us: u64,
    errors: u64,
    hits: u64,
    misses: u64,
}

impl RollingWindow {
    pub(crate) fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            max_age,
            sum_us: 0,
            errors: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub(crate) fn push(&mut self, at: Instant, sample: &MetricSample) {
        if self.capacity == 0 {
            return;
        }
        while self.samples.len() >= self.capacity {
            self.pop_oldest();
        }

        let timed = Timed {
            at,
            duration_us: (sample.duration_ms.max(0.0) * 1000.0).round() as u64,
            error: sample.is_error(),
            outcome: sample.cache_outcome,
        };
        self.sum_us += timed.duration_us;
        self.errors += u64::from(timed.error);
        match timed.outcome {
            CacheOutcome::Hit => self.hits += 1,
            CacheOutcome::Miss => self.misses += 1,
            CacheOutcome::Bypass => {}
        }
        self.samples.push_back(timed);
    }

    fn pop_oldest(&mut self) {
        if let Some(old) = self.samples.pop_front() {
            self.sum_us -= old.duration_us;
            self.errors -= u64::from(old.error);
            match old.outcome {
                CacheOutcome::Hit => self.hits -= 1,
                CacheOutcome::Miss => self.misses -= 1,
                CacheOutcome::Bypass => {}
            }
        }
    }

    pub(crate) fn prune(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.at) >= self.max_age {
                self.pop_oldest();
            } else {
                break;
            }
        }
    }

    pub(crate) fn stats(&mut self, now: Instant) -> WindowStats {
        self.prune(now);

        let requests = self.samples.len();
        if requests == 0 {
            return WindowStats::default();
        }

        let lookups = self.hits + self.misses;
        WindowStats {
            requests,
            avg_response_time: self.sum_us as f64 / requests as f64 / 1000.0,
            error_rate: (self.errors as f64 * 100.0) / requests as f64,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                (self.hits as f64 * 100.0) / lookups as f64
            },
        }
    }

    /// Mean duration of samples younger than `horizon`, walking back from the
    /// newest sample only as far as needed.
    pub(crate) fn recent_mean(&self, now: Instant, horizon: Duration) -> f64 {
        let mut count = 0u64;
        let mut sum = 0u64;
        for s in self.samples.iter().rev() {
            if now.saturating_duration_since(s.at) >= horizon {
                break;
            }
            count += 1;
            sum += s.duration_us;
        }
        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64 / 1000.0
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ms: f64, status: u16, outcome: CacheOutcome) -> MetricSample {
        MetricSample::new("/api/terbaru", ms, status, outcome)
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let mut w = RollingWindow::new(3, Duration::from_secs(300));
        let now = Instant::now();
        w.push(now, &sample(100.0, 500, CacheOutcome::Miss));
        for _ in 0..3 {
            w.push(now, &sample(10.0, 200, CacheOutcome::Hit));
        }

        let stats = w.stats(now);
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.cache_hit_rate, 100.0);
        assert_eq!(stats.avg_response_time, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_evicts() {
        let mut w = RollingWindow::new(100, Duration::from_secs(60));
        let start = Instant::now();
        w.push(start, &sample(50.0, 200, CacheOutcome::Miss));
        w.push(start + Duration::from_secs(30), &sample(10.0, 200, CacheOutcome::Miss));

        let stats = w.stats(start + Duration::from_secs(60));
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.avg_response_time, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_mean_walks_tail_only() {
        let mut w = RollingWindow::new(100, Duration::from_secs(300));
        let start = Instant::now();
        w.push(start, &sample(1000.0, 200, CacheOutcome::Miss));
        w.push(start + Duration::from_secs(100), &sample(20.0, 200, CacheOutcome::Miss));
        w.push(start + Duration::from_secs(110), &sample(40.0, 200, CacheOutcome::Miss));

        let now = start + Duration::from_secs(120);
        assert_eq!(w.recent_mean(now, Duration::from_secs(60)), 30.0);
        assert_eq!(w.recent_mean(now, Duration::from_secs(1)), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bypass_excluded_from_hit_rate() {
        let mut w = RollingWindow::new(10, Duration::from_secs(60));
        let now = Instant::now();
        w.push(now, &sample(1.0, 200, CacheOutcome::Hit));
        w.push(now, &sample(1.0, 200, CacheOutcome::Bypass));
        w.push(now, &sample(1.0, 200, CacheOutcome::Miss));
        assert_eq!(w.stats(now).cache_hit_rate, 50.0);
    }
}
