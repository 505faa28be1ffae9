//! Coalescing of concurrent cache misses.
//!
//! Every caller for a key joins the same `OnceCell`. Exactly one init future
//! runs at a time; if it is dropped before finishing, the cell stays empty
//! and the next waiter's init runs instead.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Result of joining an in-flight call.
#[derive(Debug, Clone)]
pub struct Joined<T> {
    pub value: T,
    /// Whether this caller's init produced the value.
    pub led: bool,
}

pub struct InFlight<T> {
    calls: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T: Clone> InFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Run `init` for `key` unless another caller is already running it, in
    /// which case wait for and clone that caller's value.
    pub async fn run<F, Fut>(&self, key: &str, init: F) -> Joined<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = Arc::clone(
            &self
                .calls
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let mut led = false;
        let value = cell
            .get_or_init(|| {
                led = true;
                init()
            })
            .await
            .clone();

        // A later call for this key may already have installed a fresh cell.
        self.calls
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));

        Joined { value, led }
    }

    /// Keys with a call currently registered.
    pub fn pending(&self) -> usize {
        self.calls.len()
    }
}

impl<T: Clone> Default for InFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_init() {
        let inflight = Arc::new(InFlight::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let inflight = inflight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                inflight
                    .run("k", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for handle in handles {
            let joined = handle.await.unwrap();
            assert_eq!(joined.value, 42);
            leaders += usize::from(joined.led);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(inflight.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_leader_hands_over() {
        let inflight = Arc::new(InFlight::<&'static str>::new());

        let leader = {
            let inflight = inflight.clone();
            tokio::spawn(async move {
                inflight
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        "leader"
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let follower = {
            let inflight = inflight.clone();
            tokio::spawn(async move {
                inflight
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        "follower"
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        leader.abort();
        let joined = follower.await.unwrap();
        assert_eq!(joined.value, "follower");
        assert!(joined.led);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let inflight = InFlight::<u32>::new();
        let first = inflight.run("k", || async { 1 }).await;
        let second = inflight.run("k", || async { 2 }).await;
        assert_eq!((first.value, second.value), (1, 2));
        assert!(first.led && second.led);
    }
}
