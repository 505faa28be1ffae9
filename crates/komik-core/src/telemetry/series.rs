//! Per-minute request history for the analytics time series.

use std::collections::VecDeque;
use std::str::FromStr;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::TelemetryError;

/// Analytics look-back period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    OneHour,
    SixHours,
    OneDay,
    SevenDays,
}

impl Period {
    /// Total span in minutes.
    pub fn span_minutes(&self) -> i64 {
        match self {
            Self::OneHour => 60,
            Self::SixHours => 6 * 60,
            Self::OneDay => 24 * 60,
            Self::SevenDays => 7 * 24 * 60,
        }
    }

    /// Width of one output bucket in minutes.
    pub fn bucket_minutes(&self) -> i64 {
        match self {
            Self::OneHour => 5,
            Self::SixHours => 30,
            Self::OneDay => 60,
            Self::SevenDays => 24 * 60,
        }
    }

    pub fn bucket_count(&self) -> usize {
        (self.span_minutes() / self.bucket_minutes()) as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::SixHours => "6h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
        }
    }
}

impl FromStr for Period {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" => Ok(Self::OneHour),
            "6h" => Ok(Self::SixHours),
            "24h" | "1d" => Ok(Self::OneDay),
            "7d" | "1w" => Ok(Self::SevenDays),
            other => Err(TelemetryError::InvalidPeriod(other.to_string())),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analytics bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub avg_response_time: f64,
    pub request_count: u64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct MinuteBucket {
    minute: i64,
    requests: u64,
    errors: u64,
    total_us: u64,
}

impl MinuteBucket {
    fn new(minute: i64) -> Self {
        Self {
            minute,
            requests: 0,
            errors: 0,
            total_us: 0,
        }
    }

    fn add(&mut self, duration_us: u64, error: bool) {
        self.requests += 1;
        self.errors += u64::from(error);
        self.total_us += duration_us;
    }
}

/// Sorted, bounded list of per-minute buckets.
#[derive(Debug)]
pub(crate) struct MinuteSeries {
    buckets: VecDeque<MinuteBucket>,
    capacity: usize,
}

fn unix_minute(at: OffsetDateTime) -> i64 {
    at.unix_timestamp().div_euclid(60)
}

impl MinuteSeries {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buckets: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn record(&mut self, at: OffsetDateTime, duration_us: u64, error: bool) {
        if self.capacity == 0 {
            return;
        }
        let minute = unix_minute(at);

        match self.buckets.back().map(|b| b.minute) {
            Some(last) if last == minute => {
                if let Some(bucket) = self.buckets.back_mut() {
                    bucket.add(duration_us, error);
                }
            }
            Some(last) if last > minute => {
                // Requests finishing out of order around a minute boundary.
                let pos = self.buckets.iter().rposition(|b| b.minute <= minute);
                match pos {
                    Some(i) if self.buckets[i].minute == minute => {
                        self.buckets[i].add(duration_us, error)
                    }
                    Some(i) => {
                        let mut bucket = MinuteBucket::new(minute);
                        bucket.add(duration_us, error);
                        self.buckets.insert(i + 1, bucket);
                    }
                    None if self.buckets.len() < self.capacity => {
                        let mut bucket = MinuteBucket::new(minute);
                        bucket.add(duration_us, error);
                        self.buckets.push_front(bucket);
                    }
                    None => {}
                }
            }
            _ => {
                let mut bucket = MinuteBucket::new(minute);
                bucket.add(duration_us, error);
                self.buckets.push_back(bucket);
            }
        }

        while self.buckets.len() > self.capacity {
            self.buckets.pop_front();
        }
    }

    /// Aggregate the history into `period` buckets ending with the bucket
    /// that contains `now`. Buckets are aligned to multiples of their width
    /// in unix time.
    pub(crate) fn points(&self, period: Period, now: OffsetDateTime) -> Vec<TimeSeriesPoint> {
        let width = period.bucket_minutes();
        let count = period.bucket_count();
        let now_minute = unix_minute(now);
        let last_start = now_minute - now_minute.rem_euclid(width);
        let first_start = last_start - (count as i64 - 1) * width;

        let mut acc = vec![MinuteBucket::new(0); count];
        for bucket in self.buckets.iter().rev() {
            if bucket.minute < first_start {
                break;
            }
            let idx = ((bucket.minute - first_start) / width) as usize;
            if let Some(slot) = acc.get_mut(idx) {
                slot.requests += bucket.requests;
                slot.errors += bucket.errors;
                slot.total_us += bucket.total_us;
            }
        }

        acc.into_iter()
            .enumerate()
            .map(|(i, b)| {
                let start_minute = first_start + i as i64 * width;
                let (avg, error_rate) = if b.requests == 0 {
                    (0.0, 0.0)
                } else {
                    (
                        b.total_us as f64 / b.requests as f64 / 1000.0,
                        (b.errors as f64 * 100.0) / b.requests as f64,
                    )
                };
                TimeSeriesPoint {
                    timestamp: OffsetDateTime::from_unix_timestamp(start_minute * 60)
                        .unwrap_or(OffsetDateTime::UNIX_EPOCH),
                    avg_response_time: avg,
                    request_count: b.requests,
                    error_rate,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_period_parsing() {
        assert_eq!("1h".parse::<Period>().unwrap(), Period::OneHour);
        assert_eq!("24H".parse::<Period>().unwrap(), Period::OneDay);
        assert_eq!("7d".parse::<Period>().unwrap().bucket_count(), 7);
        assert!("2w".parse::<Period>().is_err());
    }

    #[test]
    fn test_points_bucketed_and_aligned() {
        let mut series = MinuteSeries::new(1000);
        series.record(datetime!(2026-03-01 11:02:10 UTC), 10_000, false);
        series.record(datetime!(2026-03-01 11:04:59 UTC), 30_000, true);
        series.record(datetime!(2026-03-01 11:58:00 UTC), 5_000, false);
        // Outside the hour.
        series.record(datetime!(2026-03-01 10:00:00 UTC), 99_000, true);

        let points = series.points(Period::OneHour, datetime!(2026-03-01 11:59:30 UTC));
        assert_eq!(points.len(), 12);
        assert_eq!(points[0].timestamp, datetime!(2026-03-01 11:00:00 UTC));
        assert_eq!(points[0].request_count, 2);
        assert_eq!(points[0].avg_response_time, 20.0);
        assert_eq!(points[0].error_rate, 50.0);
        assert_eq!(points[11].timestamp, datetime!(2026-03-01 11:55:00 UTC));
        assert_eq!(points[11].request_count, 1);
        assert_eq!(points[5].request_count, 0);
    }

    #[test]
    fn test_out_of_order_minutes() {
        let mut series = MinuteSeries::new(10);
        series.record(datetime!(2026-03-01 11:05:00 UTC), 1_000, false);
        series.record(datetime!(2026-03-01 11:03:00 UTC), 1_000, false);
        series.record(datetime!(2026-03-01 11:05:30 UTC), 1_000, false);

        let minutes: Vec<i64> = series.buckets.iter().map(|b| b.minute).collect();
        assert_eq!(minutes.len(), 2);
        assert!(minutes[0] < minutes[1]);
        assert_eq!(series.buckets[1].requests, 2);
    }

    #[test]
    fn test_capacity_bound() {
        let mut series = MinuteSeries::new(3);
        for m in 0..10 {
            let at = OffsetDateTime::from_unix_timestamp(m * 60).unwrap();
            series.record(at, 1, false);
        }
        assert_eq!(series.buckets.len(), 3);
        assert_eq!(series.buckets[0].minute, 7);
    }
}
