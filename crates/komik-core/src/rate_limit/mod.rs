//! Sliding-window rate limiting.
//!
//! Each tier keeps one [`ClientWindow`] per client key in a `DashMap`. The
//! prune → count → record sequence runs under the map's entry lock, so every
//! client key has exactly one writer at a time even on a multi-threaded
//! runtime.

mod window;

pub use window::ClientWindow;

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::RateLimitExceeded;

/// Limits for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitTier {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitTier {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

/// Which set of limits applies to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Default,
    Strict,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

/// An admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub limit: u32,
    /// Requests still allowed in the current window.
    pub remaining: u32,
    /// Time until the oldest counted request leaves the window.
    pub reset_after: Duration,
}

/// Sliding-window counter for a single tier.
pub struct SlidingWindow {
    tier: RateLimitTier,
    clients: DashMap<String, ClientWindow>,
}

impl SlidingWindow {
    pub fn new(tier: RateLimitTier) -> Self {
        Self {
            tier,
            clients: DashMap::new(),
        }
    }

    pub fn tier(&self) -> RateLimitTier {
        self.tier
    }

    pub fn check(&self, client: &str) -> Result<Admission, RateLimitExceeded> {
        self.check_at(client, Instant::now())
    }

    /// Admit or reject a request from `client` arriving at `now`.
    pub fn check_at(&self, client: &str, now: Instant) -> Result<Admission, RateLimitExceeded> {
        let RateLimitTier {
            window,
            max_requests,
        } = self.tier;

        let mut entry = self
            .clients
            .entry(client.to_string())
            .or_insert_with(|| ClientWindow::new(now));
        entry.prune(now, window);

        if entry.len() >= max_requests as usize {
            entry.touch(now);
            let retry_after = entry
                .oldest()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(window);
            return Err(RateLimitExceeded {
                limit: max_requests,
                window,
                retry_after,
            });
        }

        entry.record(now);
        let oldest = entry.oldest().unwrap_or(now);
        Ok(Admission {
            limit: max_requests,
            remaining: max_requests.saturating_sub(entry.len() as u32),
            reset_after: window.saturating_sub(now.saturating_duration_since(oldest)),
        })
    }

    /// Forget clients not seen for `retention`. Returns how many were dropped.
    pub fn evict_idle(&self, now: Instant, retention: Duration) -> usize {
        let before = self.clients.len();
        self.clients
            .retain(|_, w| now.saturating_duration_since(w.last_seen()) < retention);
        before.saturating_sub(self.clients.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

/// Two-tier limiter shared by all routes.
pub struct RateLimiter {
    default: SlidingWindow,
    strict: SlidingWindow,
    retention: Duration,
}

impl RateLimiter {
    /// `retention` is how long an idle client window is kept; it is raised
    /// to the largest tier window if smaller.
    pub fn new(default: RateLimitTier, strict: RateLimitTier, retention: Duration) -> Self {
        let retention = retention.max(default.window).max(strict.window);
        Self {
            default: SlidingWindow::new(default),
            strict: SlidingWindow::new(strict),
            retention,
        }
    }

    pub fn window(&self, tier: Tier) -> &SlidingWindow {
        match tier {
            Tier::Default => &self.default,
            Tier::Strict => &self.strict,
        }
    }

    pub fn check(&self, tier: Tier, client: &str) -> Result<Admission, RateLimitExceeded> {
        self.window(tier).check(client)
    }

    pub fn check_at(
        &self,
        tier: Tier,
        client: &str,
        now: Instant,
    ) -> Result<Admission, RateLimitExceeded> {
        self.window(tier).check_at(client, now)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Drop idle client windows in both tiers.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let removed =
            self.default.evict_idle(now, self.retention) + self.strict.evict_idle(now, self.retention);
        if removed > 0 {
            tracing::debug!(removed, "evicted idle rate-limit windows");
        }
        removed
    }

    pub fn tracked_clients(&self) -> usize {
        self.default.tracked_clients() + self.strict.tracked_clients()
    }
}
