use std::sync::Arc;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use komik_core::telemetry::{CacheOutcome, MetricSample, PerformanceMonitor};
use tokio::time::Instant;
use uuid::Uuid;

use crate::metrics;

pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    // Preserve an incoming request id, otherwise generate one
    let req_id_value = req
        .headers()
        .get(&header_name)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    let Some(req_id_value) = req_id_value else {
        return next.run(req).await;
    };

    // Add to request extensions for downstream usage (e.g., logging)
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

/// Record one telemetry sample per completed request.
///
/// The route label is the matched route template, so `/api/detail/{slug}`
/// is one endpoint regardless of slug. The cache outcome comes from the
/// extension set by the cache middleware; responses without one count as
/// bypassed.
pub async fn record_telemetry(
    State(monitor): State<Arc<PerformanceMonitor>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| metrics::normalize_path(req.uri().path()));

    let res = next.run(req).await;

    let elapsed = started.elapsed();
    let status = res.status().as_u16();
    let outcome = res
        .extensions()
        .get::<CacheOutcome>()
        .copied()
        .unwrap_or(CacheOutcome::Bypass);

    metrics::record_http_request(method.as_str(), &route, status, elapsed);
    monitor.record(MetricSample::new(
        route,
        elapsed.as_secs_f64() * 1000.0,
        status,
        outcome,
    ));
    res
}
