use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use serde_json::json;

use crate::metrics;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.cache.stats();
    let perf = state.monitor.snapshot();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": perf.uptime,
        "cache": cache,
        "performance": {
            "totalRequests": perf.total_requests,
            "totalErrors": perf.total_errors,
            "avgResponseTime": perf.avg_response_time,
            "cacheHitRate": perf.cache_hit_rate,
            "errorRate": perf.error_rate,
        },
        "rateLimit": {
            "trackedClients": state.limiter.tracked_clients(),
        },
        "realtime": {
            "connections": state.realtime.active_connections(),
        },
    }))
}

pub async fn prometheus() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/health", get(health))
        .route("/metrics", get(prometheus))
}
