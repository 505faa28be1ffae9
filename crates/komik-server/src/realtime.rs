//! Live metrics over Server-Sent Events.
//!
//! Each subscriber gets its own push task. The task sends a `connected`
//! event, then a `metrics` event every push interval until the transport
//! goes away. Dropping the [`Subscription`] aborts the task, so a closed
//! connection never sees another push attempt.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use komik_core::TelemetryError;
use komik_core::telemetry::PerformanceMonitor;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::metrics;

/// Browser reconnect delay sent with the first event.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const CHANNEL_CAPACITY: usize = 8;

/// Something that can produce the `performance` payload of a metrics event.
pub trait SnapshotSource: Send + Sync + 'static {
    fn compose(&self) -> Result<Value, TelemetryError>;
}

/// Monitor snapshot plus the short-window response time.
pub struct MonitorSnapshots {
    monitor: Arc<PerformanceMonitor>,
    recent_window: Duration,
}

impl MonitorSnapshots {
    pub fn new(monitor: Arc<PerformanceMonitor>, recent_window: Duration) -> Self {
        Self {
            monitor,
            recent_window,
        }
    }
}

impl SnapshotSource for MonitorSnapshots {
    fn compose(&self) -> Result<Value, TelemetryError> {
        let mut payload = serde_json::to_value(self.monitor.snapshot())?;
        let recent = self.monitor.recent_response_time(self.recent_window);
        match payload.as_object_mut() {
            Some(obj) => {
                obj.insert("recentResponseTime".into(), recent.into());
                Ok(payload)
            }
            None => Err(TelemetryError::Snapshot(
                "snapshot did not serialize to an object".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    Metrics {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        performance: Value,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// Encode as an SSE frame. A payload that fails to encode becomes an
    /// `error` event so the stream stays open.
    pub fn into_sse(self) -> Event {
        let event = match Event::default().json_data(&self) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode realtime event");
                let fallback = Self::Error {
                    message: e.to_string(),
                };
                Event::default().data(serde_json::to_string(&fallback).unwrap_or_default())
            }
        };
        match self {
            Self::Connected { .. } => event.retry(RECONNECT_DELAY),
            _ => event,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    opened: AtomicU64,
    pushes: AtomicU64,
}

/// Decrements the active count when the push task ends or is aborted.
struct ActiveGuard(Arc<Counters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let now = self.0.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_realtime_connections(now);
    }
}

pub struct RealtimeBroadcaster {
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
    counters: Arc<Counters>,
}

impl RealtimeBroadcaster {
    pub fn new(source: Arc<dyn SnapshotSource>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Total metrics pushes attempted across all connections.
    pub fn push_attempts(&self) -> u64 {
        self.counters.pushes.load(Ordering::SeqCst)
    }

    pub fn total_connections(&self) -> u64 {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Open a connection. The push task lives as long as the returned stream.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let id = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_realtime_connections(active);

        let guard = ActiveGuard(self.counters.clone());
        let task = tokio::spawn(push_loop(
            id,
            self.source.clone(),
            self.interval,
            self.counters.clone(),
            tx,
            guard,
        ));

        Subscription {
            events: ReceiverStream::new(rx),
            task,
        }
    }
}

async fn push_loop(
    id: u64,
    source: Arc<dyn SnapshotSource>,
    period: Duration,
    counters: Arc<Counters>,
    tx: mpsc::Sender<StreamEvent>,
    _guard: ActiveGuard,
) {
    let mut state = ConnectionState::Connecting;
    tracing::debug!(connection = id, state = ?state, "realtime connection");

    let connected = StreamEvent::Connected {
        timestamp: OffsetDateTime::now_utc(),
    };
    if tx.send(connected).await.is_err() {
        tracing::debug!(connection = id, "realtime client gone before open");
        return;
    }
    state = ConnectionState::Open;
    tracing::info!(connection = id, state = ?state, "realtime connection open");

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while state == ConnectionState::Open {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tx.closed() => {
                state = ConnectionState::Closed;
                continue;
            }
        }

        counters.pushes.fetch_add(1, Ordering::SeqCst);
        let event = match source.compose() {
            Ok(performance) => StreamEvent::Metrics {
                timestamp: OffsetDateTime::now_utc(),
                performance,
            },
            Err(e) => {
                tracing::warn!(connection = id, error = %e, "failed to compose metrics snapshot");
                StreamEvent::Error {
                    message: e.to_string(),
                }
            }
        };
        if tx.send(event).await.is_err() {
            state = ConnectionState::Closed;
        }
    }

    tracing::info!(connection = id, state = ?state, "realtime connection closed");
}

/// Event stream for one connection. Dropping it stops the push task.
pub struct Subscription {
    events: ReceiverStream<StreamEvent>,
    task: JoinHandle<()>,
}

impl Stream for Subscription {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// SSE response for one subscriber.
pub fn sse_response(
    broadcaster: &RealtimeBroadcaster,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    let events = broadcaster
        .subscribe()
        .map(|event| Ok::<_, Infallible>(event.into_sse()));
    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use axum::response::IntoResponse;

    struct Fixed;

    impl SnapshotSource for Fixed {
        fn compose(&self) -> Result<Value, TelemetryError> {
            Ok(serde_json::json!({"totalRequests": 7}))
        }
    }

    struct Flaky(AtomicBool);

    impl SnapshotSource for Flaky {
        fn compose(&self) -> Result<Value, TelemetryError> {
            if self.0.swap(false, Ordering::SeqCst) {
                Err(TelemetryError::Snapshot("boom".into()))
            } else {
                Ok(serde_json::json!({}))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_then_periodic_metrics() {
        let broadcaster = RealtimeBroadcaster::new(Arc::new(Fixed), Duration::from_millis(2500));
        let mut sub = broadcaster.subscribe();

        assert!(matches!(sub.next().await, Some(StreamEvent::Connected { .. })));
        let started = Instant::now();
        match sub.next().await {
            Some(StreamEvent::Metrics { performance, .. }) => {
                assert_eq!(performance["totalRequests"], 7)
            }
            other => panic!("expected metrics, got {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_millis(2500));
        assert!(matches!(sub.next().await, Some(StreamEvent::Metrics { .. })));
        assert_eq!(broadcaster.push_attempts(), 2);
        assert_eq!(broadcaster.active_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pushes_after_disconnect() {
        let broadcaster = RealtimeBroadcaster::new(Arc::new(Fixed), Duration::from_millis(2500));
        let mut sub = broadcaster.subscribe();
        sub.next().await;
        sub.next().await;
        let before = broadcaster.push_attempts();

        drop(sub);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(broadcaster.push_attempts(), before);
        assert_eq!(broadcaster.active_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compose_failure_sends_error_and_keeps_open() {
        let broadcaster = RealtimeBroadcaster::new(
            Arc::new(Flaky(AtomicBool::new(true))),
            Duration::from_millis(2500),
        );
        let mut sub = broadcaster.subscribe();
        sub.next().await;

        match sub.next().await {
            Some(StreamEvent::Error { message }) => assert!(message.contains("boom")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(matches!(sub.next().await, Some(StreamEvent::Metrics { .. })));
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = StreamEvent::Error {
            message: "x".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "message": "x"}));
    }

    #[tokio::test]
    async fn test_monitor_snapshot_has_recent_time() {
        let monitor = Arc::new(PerformanceMonitor::default());
        let source = MonitorSnapshots::new(monitor, Duration::from_secs(60));
        let payload = source.compose().unwrap();
        assert_eq!(payload["recentResponseTime"], 0.0);
        assert_eq!(payload["totalRequests"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sse_body_keeps_streaming_after_error_event() {
        let broadcaster = RealtimeBroadcaster::new(
            Arc::new(Flaky(AtomicBool::new(true))),
            Duration::from_millis(2500),
        );
        let mut body = sse_response(&broadcaster)
            .into_response()
            .into_body()
            .into_data_stream();

        let mut frames = Vec::new();
        while frames.len() < 3 {
            let chunk = body.next().await.unwrap().unwrap();
            frames.push(String::from_utf8(chunk.to_vec()).unwrap());
        }

        assert!(frames[0].contains("\"type\":\"connected\""));
        assert!(frames[0].contains("retry: 5000"));
        assert!(frames[1].contains("\"type\":\"error\""));
        assert!(frames[2].contains("\"type\":\"metrics\""));
        assert_eq!(broadcaster.active_connections(), 1);
    }
}
