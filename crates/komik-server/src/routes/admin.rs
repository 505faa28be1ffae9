use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use komik_core::cache::EntryQuery;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::metrics;
use crate::server::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct EntriesParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearParams {
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WarmRequest {
    pub keys: Vec<String>,
}

pub async fn list_entries(
    State(state): State<AppState>,
    Query(params): Query<EntriesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = EntryQuery {
        limit: params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset: params.offset.unwrap_or(0),
        pattern: params.pattern.filter(|p| !p.is_empty()),
    };
    let page = state
        .cache
        .entries(&query)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "entries": page.entries,
        "pagination": {
            "total": page.total,
            "limit": page.limit,
            "offset": page.offset,
            "hasMore": page.has_more(),
        }
    })))
}

pub async fn clear(
    State(state): State<AppState>,
    Query(params): Query<ClearParams>,
) -> Result<impl IntoResponse, ApiError> {
    let pattern = params.pattern.filter(|p| !p.is_empty() && p != "*");

    let body = match pattern {
        None => {
            let deleted = state.cache.clear();
            tracing::info!(deleted, "cache cleared");
            json!({
                "success": true,
                "deleted": deleted,
                "message": "Cache cleared",
            })
        }
        Some(pattern) => {
            let deleted = state
                .cache
                .invalidate_pattern(&pattern)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            tracing::info!(pattern = %pattern, deleted, "cache entries invalidated");
            json!({
                "success": true,
                "deleted": deleted,
                "pattern": pattern,
            })
        }
    };
    metrics::record_cache_invalidations(body["deleted"].as_u64().unwrap_or(0) as usize);
    metrics::set_cache_entries(state.cache.len());
    Ok(Json(body))
}

pub async fn warm(
    State(state): State<AppState>,
    Json(request): Json<WarmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.keys.is_empty() {
        return Err(ApiError::BadRequest("keys must not be empty".into()));
    }
    let (report, targets) = state.warmer.plan(request.keys);
    tracing::info!(
        accepted = report.accepted.len(),
        rejected = report.rejected.len(),
        "cache warm requested"
    );
    if !targets.is_empty() {
        state.warmer.spawn(targets);
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "accepted": report.accepted,
            "rejected": report.rejected,
        })),
    ))
}

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "stats": state.cache.stats(),
        "policy": state.cache.policy(),
        "inFlight": state.content_cache.in_flight(),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/cache", delete(clear))
        .route("/api/cache/entries", get(list_entries))
        .route("/api/cache/stats", get(stats))
        .route("/api/cache/warm", post(warm))
}
