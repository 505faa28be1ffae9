//! Cache warming.
//!
//! A warm request names fingerprints. Each accepted key is replayed as a GET
//! through the cached content router, so the entry is produced by the same
//! handler and middleware that would produce it for a real client.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{Router, body::Body, http::Request};
use komik_core::cache::{ParsedKey, fingerprint, parse_fingerprint};
use serde::Serialize;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use super::ResponseCache;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmRejection {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<WarmRejection>,
}

pub struct CacheWarmer {
    router: Router,
    store: Arc<ResponseCache>,
    namespaces: Vec<&'static str>,
}

impl CacheWarmer {
    /// `router` must be the cached content router without rate limiting or
    /// telemetry, so warming does not count as client traffic.
    pub fn new(router: Router, store: Arc<ResponseCache>, namespaces: Vec<&'static str>) -> Self {
        Self {
            router,
            store,
            namespaces,
        }
    }

    /// Validate keys. Returns the report and the keys to replay.
    pub fn plan(&self, keys: Vec<String>) -> (WarmReport, Vec<ParsedKey>) {
        let mut report = WarmReport::default();
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        for key in keys {
            match self.check(&key, &mut seen) {
                Ok(parsed) => {
                    report.accepted.push(key);
                    targets.push(parsed);
                }
                Err(reason) => report.rejected.push(WarmRejection { key, reason }),
            }
        }
        (report, targets)
    }

    fn check(&self, key: &str, seen: &mut HashSet<String>) -> Result<ParsedKey, String> {
        let parsed = parse_fingerprint(key).map_err(|e| e.to_string())?;
        if parsed.method != "GET" {
            return Err(format!("method {} is not cacheable", parsed.method));
        }
        if !self.namespaces.contains(&parsed.namespace.as_str()) {
            return Err(format!("unknown namespace '{}'", parsed.namespace));
        }
        let canonical = fingerprint(
            &parsed.namespace,
            &parsed.method,
            &parsed.path,
            parsed.query.as_deref(),
        );
        if canonical != key {
            return Err(format!("not in canonical form, expected '{canonical}'"));
        }
        if !seen.insert(canonical) {
            return Err("duplicate key".into());
        }
        if self.store.contains(key) {
            return Err("already cached".into());
        }
        Ok(parsed)
    }

    /// Replay every target. Returns how many ended up cached.
    pub async fn warm(&self, targets: Vec<ParsedKey>) -> usize {
        let mut populated = 0;
        for target in targets {
            let key = fingerprint(
                &target.namespace,
                &target.method,
                &target.path,
                target.query.as_deref(),
            );
            let request = match Request::get(target.path_and_query()).body(Body::empty()) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cannot build warm request");
                    continue;
                }
            };

            let status = match self.router.clone().oneshot(request).await {
                Ok(response) => response.status(),
                Err(never) => match never {},
            };
            if self.store.contains(&key) {
                populated += 1;
            } else {
                tracing::debug!(key = %key, status = %status, "warm request did not populate its key");
            }
        }
        tracing::info!(populated, "cache warm finished");
        populated
    }

    pub fn spawn(self: &Arc<Self>, targets: Vec<ParsedKey>) -> JoinHandle<usize> {
        let warmer = Arc::clone(self);
        tokio::spawn(async move { warmer.warm(targets).await })
    }
}
