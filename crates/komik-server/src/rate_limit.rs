//! Rate limiting middleware.
//!
//! The client key is the peer address. `X-Forwarded-For` is only consulted
//! when the peer is a configured trusted proxy, and then only as far back as
//! the first hop that is not itself trusted.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ipnetwork::IpNetwork;
use komik_core::rate_limit::{RateLimiter, Tier};

use crate::error::ApiError;
use crate::metrics;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Key used when the peer address is not available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolves the client identity of a request.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    trusted: Vec<IpNetwork>,
}

impl ClientIdentity {
    pub fn new(trusted: Vec<IpNetwork>) -> Self {
        Self { trusted }
    }

    fn is_trusted(&self, ip: IpAddr) -> bool {
        self.trusted.iter().any(|net| net.contains(ip))
    }

    pub fn resolve(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> String {
        let Some(peer) = peer else {
            return UNKNOWN_CLIENT.to_string();
        };
        if !self.is_trusted(peer) {
            return peer.to_string();
        }

        let hops: Vec<&str> = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .collect();

        let mut client = peer;
        for hop in hops.iter().rev() {
            match hop.parse::<IpAddr>() {
                Ok(ip) if self.is_trusted(ip) => client = ip,
                Ok(ip) => return ip.to_string(),
                Err(_) => break,
            }
        }
        client.to_string()
    }
}

/// Which tier guards a path. `None` means the path is not limited.
pub fn tier_for_path(path: &str) -> Option<Tier> {
    if !path.starts_with("/api/") {
        return None;
    }
    if path == "/api/search" || path.starts_with("/api/search/") || path.starts_with("/api/cache") {
        Some(Tier::Strict)
    } else {
        Some(Tier::Default)
    }
}

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub identity: Arc<ClientIdentity>,
    pub enabled: bool,
}

pub async fn enforce(State(state): State<RateLimitState>, req: Request, next: Next) -> Response {
    if !state.enabled {
        return next.run(req).await;
    }
    let Some(tier) = tier_for_path(req.uri().path()) else {
        return next.run(req).await;
    };

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client = state.identity.resolve(peer, req.headers());

    match state.limiter.check(tier, &client) {
        Ok(admission) => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(admission.limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(admission.remaining));
            headers.insert(
                "x-ratelimit-reset",
                HeaderValue::from(admission.reset_after.as_millis().div_ceil(1000) as u64),
            );
            response
        }
        Err(limited) => {
            tracing::warn!(
                client = %client,
                tier = %tier,
                retry_after_ms = limited.retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            metrics::record_rate_limit_rejection(&tier.to_string());
            ApiError::from(limited).into_response()
        }
    }
}
