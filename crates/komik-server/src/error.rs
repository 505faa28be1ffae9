//! HTTP error envelope.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use komik_core::{RateLimitExceeded, TelemetryError};
use serde_json::json;

use crate::provider::SourceError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Source(SourceError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Source(SourceError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Self::Source(SourceError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            Self::Telemetry(TelemetryError::InvalidPeriod(_)) => StatusCode::BAD_REQUEST,
            Self::Telemetry(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_)
            | Self::Source(SourceError::InvalidInput(_))
            | Self::Telemetry(TelemetryError::InvalidPeriod(_)) => "BAD_REQUEST",
            Self::NotFound(_) | Self::Source(SourceError::NotFound { .. }) => "NOT_FOUND",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::Source(SourceError::Upstream(_)) => "UPSTREAM_ERROR",
            Self::Telemetry(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        let retry = match &self {
            Self::RateLimited(limited) => Some(limited.clone()),
            _ => None,
        };
        let Some(limited) = retry else {
            return (status, Json(body)).into_response();
        };

        body["retryAfter"] = json!(limited.retry_after.as_millis() as u64);
        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(RETRY_AFTER, HeaderValue::from(limited.retry_after_secs()));
        headers.insert("x-ratelimit-limit", HeaderValue::from(limited.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        response
    }
}
