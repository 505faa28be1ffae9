use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::{ContentCache, cache_response};
use crate::error::ApiError;
use crate::provider::{ComicSource, SortBy};

/// Cache namespaces of the content routes, in route order.
pub const NAMESPACES: [&str; 4] = ["terbaru", "detail", "chapter", "search"];

type Source = Arc<dyn ComicSource>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestParams {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub sort_by: SortBy,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default = "first_page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    Json(json!({ "success": true, "data": data }))
}

pub async fn latest(
    State(source): State<Source>,
    Query(params): Query<LatestParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.page == 0 {
        return Err(ApiError::BadRequest("page must be >= 1".into()));
    }
    let page = source.latest(params.page, params.sort_by).await?;
    Ok(ok(page))
}

pub async fn detail(
    State(source): State<Source>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(source.detail(&slug).await?))
}

pub async fn chapter(
    State(source): State<Source>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(source.chapter(&slug).await?))
}

pub async fn search(
    State(source): State<Source>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.page == 0 {
        return Err(ApiError::BadRequest("page must be >= 1".into()));
    }
    Ok(ok(source.search(&params.q, params.page).await?))
}

/// Content routes, each behind the cache middleware for its namespace.
pub fn router(source: Source, cache: &ContentCache) -> Router {
    let cached = |namespace: &'static str| {
        middleware::from_fn_with_state(cache.route(namespace), cache_response)
    };
    let [terbaru, detail_ns, chapter_ns, search_ns] = NAMESPACES;

    Router::new()
        .route("/api/terbaru", get(latest).layer(cached(terbaru)))
        .route("/api/detail/{slug}", get(detail).layer(cached(detail_ns)))
        .route("/api/chapter/{slug}", get(chapter).layer(cached(chapter_ns)))
        .route("/api/search", get(search).layer(cached(search_ns)))
        .with_state(source)
}
