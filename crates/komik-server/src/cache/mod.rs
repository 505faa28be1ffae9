//! Response caching for read-only content routes.
//!
//! The middleware fingerprints each GET request, serves stored responses on
//! a hit, and on a miss runs the handler once per key no matter how many
//! requests for that key arrive while it runs. The outcome is attached to
//! the response as a [`CacheOutcome`] extension for the telemetry layer.

pub mod inflight;
pub mod warm;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use komik_core::cache::{CacheStore, Weigh, fingerprint};
use komik_core::telemetry::CacheOutcome;

use crate::config::CacheConfig;
use crate::error::ApiError;
use crate::metrics;
use inflight::InFlight;

pub use warm::{CacheWarmer, WarmRejection, WarmReport};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Response headers kept with a cached body.
const STORED_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LANGUAGE,
    header::ETAG,
    header::LAST_MODIFIED,
];

/// A captured response, as stored in the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
}

impl Weigh for CachedResponse {
    fn weight(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(name, value)| name.as_str().len() + value.len())
                .sum::<usize>()
    }
}

impl CachedResponse {
    /// Rebuild a response, tagged with the cache outcome and entry age.
    pub fn to_response(&self, outcome: CacheOutcome, age: Duration) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers.insert(header::AGE, HeaderValue::from(age.as_secs()));
        tag(response, outcome)
    }
}

pub type ResponseCache = CacheStore<CachedResponse>;

/// What the leading request hands to the requests waiting on it.
#[derive(Debug, Clone)]
pub enum Shared {
    Ready(CachedResponse),
    /// Not storable, too large, or not buffered; waiters run their own handler.
    Unshareable,
}

/// Store and in-flight registry shared by every cached route.
#[derive(Clone)]
pub struct ContentCache {
    store: Arc<ResponseCache>,
    inflight: Arc<InFlight<Shared>>,
    config: Arc<CacheConfig>,
}

impl ContentCache {
    pub fn new(store: Arc<ResponseCache>, config: CacheConfig) -> Self {
        Self {
            store,
            inflight: Arc::new(InFlight::new()),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<ResponseCache> {
        &self.store
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.pending()
    }

    /// Middleware state for one route namespace.
    pub fn route(&self, namespace: &'static str) -> RouteCache {
        RouteCache {
            cache: self.clone(),
            namespace,
            ttl: self.config.ttl_for(namespace),
        }
    }
}

#[derive(Clone)]
pub struct RouteCache {
    cache: ContentCache,
    namespace: &'static str,
    ttl: Duration,
}

impl RouteCache {
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

pub fn tag(mut response: Response, outcome: CacheOutcome) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(outcome.as_str()));
    response.extensions_mut().insert(outcome);
    response
}

fn is_cacheable(status: StatusCode, headers: &HeaderMap) -> bool {
    if !status.is_success() {
        return false;
    }
    !headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase())
        .any(|d| d == "no-store" || d == "no-cache" || d == "private")
}

/// Buffer a handler response so it can be shared and stored.
///
/// Returns the response to deliver to the leading caller and what waiting
/// callers get. Only a storable response is ever [`Shared::Ready`]; anything
/// else leaves waiters to run their own handler.
async fn capture(response: Response, max_body_bytes: usize) -> (Response, Shared) {
    if !is_cacheable(response.status(), response.headers()) {
        return (tag(response, CacheOutcome::Miss), Shared::Unshareable);
    }
    let fits = HttpBody::size_hint(response.body())
        .upper()
        .is_some_and(|upper| upper <= max_body_bytes as u64);
    if !fits {
        return (tag(response, CacheOutcome::Bypass), Shared::Unshareable);
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "failed to buffer response body");
            let response = ApiError::Internal("failed to read response body".into()).into_response();
            return (tag(response, CacheOutcome::Bypass), Shared::Unshareable);
        }
    };

    let cached = CachedResponse {
        status: parts.status,
        headers: STORED_HEADERS
            .iter()
            .filter_map(|name| parts.headers.get(name).map(|v| (name.clone(), v.clone())))
            .collect(),
        body: bytes.clone(),
    };
    let response = tag(
        Response::from_parts(parts, Body::from(bytes)),
        CacheOutcome::Miss,
    );
    (response, Shared::Ready(cached))
}

/// Cache middleware for one route namespace.
pub async fn cache_response(
    State(route): State<RouteCache>,
    req: Request,
    next: Next,
) -> Response {
    let ContentCache {
        store,
        inflight,
        config,
    } = &route.cache;

    if !config.enabled || req.method() != Method::GET {
        return tag(next.run(req).await, CacheOutcome::Bypass);
    }

    let key = fingerprint(
        route.namespace,
        req.method().as_str(),
        req.uri().path(),
        req.uri().query(),
    );

    if let Some(hit) = store.get(&key) {
        tracing::debug!(key = %key, hits = hit.hit_count, "cache hit");
        metrics::record_cache_hit(route.namespace);
        return hit.value.to_response(CacheOutcome::Hit, hit.age);
    }
    metrics::record_cache_miss(route.namespace);

    let mut pending = Some((req, next));
    let mut own: Option<Response> = None;
    let max_body_bytes = config.max_body_bytes;
    let ttl = route.ttl;

    let joined = {
        let pending = &mut pending;
        let own = &mut own;
        let key = key.as_str();
        inflight
            .run(key, move || async move {
                // A previous leader may have stored the entry after our lookup.
                if store.contains(key)
                    && let Some(hit) = store.get(key)
                {
                    *own = Some(hit.value.to_response(CacheOutcome::Hit, hit.age));
                    return Shared::Ready(hit.value);
                }
                let Some((req, next)) = pending.take() else {
                    return Shared::Unshareable;
                };
                let (response, shared) = capture(next.run(req).await, max_body_bytes).await;
                if let Shared::Ready(cached) = &shared {
                    store.set(key, cached.clone(), ttl);
                    tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cached response");
                }
                *own = Some(response);
                shared
            })
            .await
    };

    if joined.led
        && let Some(response) = own
    {
        return response;
    }

    match joined.value {
        Shared::Ready(cached) => {
            tracing::debug!(key = %key, "coalesced onto in-flight request");
            metrics::record_cache_coalesced(route.namespace);
            cached.to_response(CacheOutcome::Hit, Duration::ZERO)
        }
        Shared::Unshareable => match pending.take() {
            Some((req, next)) => tag(next.run(req).await, CacheOutcome::Bypass),
            None => ApiError::Internal("cache request lost".into()).into_response(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use komik_core::cache::EvictionPolicy;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    #[test]
    fn test_cache_control_opt_out() {
        let mut headers = HeaderMap::new();
        assert!(is_cacheable(StatusCode::OK, &headers));
        assert!(!is_cacheable(StatusCode::NOT_FOUND, &headers));

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60, Private"));
        assert!(!is_cacheable(StatusCode::OK, &headers));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=60"));
        assert!(is_cacheable(StatusCode::OK, &headers));
    }

    #[tokio::test]
    async fn test_capture_keeps_header_subset() {
        let response = (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::SET_COOKIE, "session=1"),
            ],
            "{\"ok\":true}",
        )
            .into_response();

        let (delivered, shared) = capture(response, 1024).await;
        assert_eq!(delivered.headers()[X_CACHE], "MISS");
        assert!(delivered.headers().contains_key(header::SET_COOKIE));

        let Shared::Ready(cached) = shared else {
            panic!("expected a shareable response");
        };
        assert_eq!(cached.body, Bytes::from_static(b"{\"ok\":true}"));
        assert_eq!(cached.headers.len(), 1);
        assert_eq!(cached.headers[0].0, header::CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_capture_oversized_is_bypassed() {
        let response = "x".repeat(2048).into_response();
        let (delivered, shared) = capture(response, 1024).await;
        assert!(matches!(shared, Shared::Unshareable));
        assert_eq!(delivered.headers()[X_CACHE], "BYPASS");
        let body = axum::body::to_bytes(delivered.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 2048);
    }

    #[tokio::test]
    async fn test_capture_refuses_to_share_unstorable() {
        let private = (
            [(header::CACHE_CONTROL, "private"), (header::SET_COOKIE, "session=7")],
            "mine",
        )
            .into_response();
        let (delivered, shared) = capture(private, 1024).await;
        assert!(matches!(shared, Shared::Unshareable));
        assert_eq!(delivered.headers()[X_CACHE], "MISS");
        assert!(delivered.headers().contains_key(header::SET_COOKIE));

        let failed = (StatusCode::SERVICE_UNAVAILABLE, "down").into_response();
        let (delivered, shared) = capture(failed, 1024).await;
        assert!(matches!(shared, Shared::Unshareable));
        assert_eq!(delivered.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_takeover_serves_entry_stored_by_cancelled_leader() {
        const KEY: &str = "terbaru:GET:/api/terbaru";

        let cache = ContentCache::new(
            Arc::new(CacheStore::new(10, EvictionPolicy::Lru)),
            CacheConfig::default(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let app = {
            let calls = calls.clone();
            Router::<()>::new().route(
                "/api/terbaru",
                get(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "fresh"
                })
                .layer(from_fn_with_state(cache.route("terbaru"), cache_response)),
            )
        };

        // A leader that registers, waits, stores the entry, then never finishes.
        let (started_tx, started_rx) = oneshot::channel();
        let (go_tx, go_rx) = oneshot::channel::<()>();
        let (stored_tx, stored_rx) = oneshot::channel();
        let leader = {
            let inflight = cache.inflight.clone();
            let store = cache.store.clone();
            tokio::spawn(async move {
                inflight
                    .run(KEY, || async move {
                        let _ = started_tx.send(());
                        let _ = go_rx.await;
                        let cached = CachedResponse {
                            status: StatusCode::OK,
                            headers: Vec::new(),
                            body: Bytes::from_static(b"stored"),
                        };
                        store.set(KEY, cached, Duration::from_secs(60));
                        let _ = stored_tx.send(());
                        std::future::pending::<Shared>().await
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        // The request misses the store and joins the leader's call.
        let request = axum::http::Request::builder()
            .uri("/api/terbaru")
            .body(Body::empty())
            .unwrap();
        let mut waiting = tokio_test::task::spawn(app.oneshot(request));
        for _ in 0..3 {
            tokio_test::assert_pending!(waiting.poll());
        }

        go_tx.send(()).unwrap();
        stored_rx.await.unwrap();
        leader.abort();
        let _ = leader.await;

        assert!(waiting.is_woken());
        let response = tokio_test::assert_ready_ok!(waiting.poll());
        assert_eq!(response.headers()[X_CACHE], "HIT");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"stored"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.in_flight(), 0);
    }
}
