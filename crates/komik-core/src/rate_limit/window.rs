use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Recent request timestamps for one client.
#[derive(Debug, Clone)]
pub struct ClientWindow {
    timestamps: VecDeque<Instant>,
    last_seen: Instant,
}

impl ClientWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            timestamps: VecDeque::new(),
            last_seen: now,
        }
    }

    /// Drop timestamps that have fallen out of the window ending at `now`.
    ///
    /// A timestamp exactly `window` old is already outside.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
        self.last_seen = now;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn oldest(&self) -> Option<Instant> {
        self.timestamps.front().copied()
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_prune_boundary() {
        let window = Duration::from_secs(10);
        let start = Instant::now();
        let mut w = ClientWindow::new(start);
        w.record(start);
        w.record(start + Duration::from_secs(5));

        w.prune(start + Duration::from_millis(9_999), window);
        assert_eq!(w.len(), 2);

        w.prune(start + Duration::from_secs(10), window);
        assert_eq!(w.len(), 1);
        assert_eq!(w.oldest(), Some(start + Duration::from_secs(5)));
    }
}
