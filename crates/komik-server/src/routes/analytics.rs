use axum::{
    Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
};
use komik_core::telemetry::Period;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::error::ApiError;
use crate::realtime;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    pub period: Option<String>,
    pub endpoint: Option<String>,
}

pub async fn analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let period: Period = params.period.as_deref().unwrap_or("24h").parse()?;
    let endpoint = params.endpoint.filter(|e| !e.is_empty());

    let series = state
        .monitor
        .analytics(period, endpoint.as_deref(), OffsetDateTime::now_utc());

    Ok(Json(json!({
        "success": true,
        "period": period.as_str(),
        "endpoint": endpoint,
        "timeSeries": series,
    })))
}

pub async fn metrics_stream(State(state): State<AppState>) -> impl IntoResponse {
    realtime::sse_response(&state.realtime)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/analytics", get(analytics))
        .route("/api/metrics/stream", get(metrics_stream))
}
