// =============================================================================
// rate_limiter.rs — THE SLIDING WINDOW
// =============================================================================
//
// A generic token/sliding-window limiter keyed by a logical bucket string
// ("edgar", "quote:alpha", ...). `acquire` blocks the caller until a slot
// opens up; it never rejects. Per-bucket state is a trimmed list of
// admission timestamps, so memory is O(limit) per bucket, not O(time).
//
// Bucket state is process-local. Multi-node deployments that need a global
// EDGAR bucket point at an external collaborator with the same
// `acquire(bucket, limit, window)` contract instead of this one.
// =============================================================================

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct Bucket {
    admissions: VecDeque<Instant>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            admissions: VecDeque::new(),
        }
    }

    /// Drops admissions older than `window`, returns how many remain.
    fn trim(&mut self, window: Duration, now: Instant) -> usize {
        while let Some(&front) = self.admissions.front() {
            if now.duration_since(front) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
        self.admissions.len()
    }
}

/// A sliding-window rate limiter shared across any number of callers.
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Blocks until the bucket has a free slot under `limit` admissions per
    /// `window`, then admits the caller and returns. Guarantees
    /// `requests_in_trailing_window <= limit` at every observation point.
    ///
    /// `cancel` lets a caller stuck waiting out a window get released by
    /// shutdown instead of blocking it indefinitely: on cancellation this
    /// returns `Err(CoreError::Cancelled)` instead of admitting the caller.
    pub async fn acquire(
        &self,
        bucket: &str,
        limit: u32,
        window: Duration,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled(format!("acquire on {bucket} aborted: shutting down")));
            }

            let wait = {
                let mut buckets = self.buckets.lock();
                let entry = buckets
                    .entry(bucket.to_string())
                    .or_insert_with(Bucket::new);
                let now = Instant::now();
                let in_window = entry.trim(window, now);

                if (in_window as u32) < limit {
                    entry.admissions.push_back(now);
                    None
                } else {
                    // Oldest admission exits the window at `front + window`;
                    // wait until then and retry.
                    let front = *entry.admissions.front().expect("in_window > 0");
                    Some(window.saturating_sub(now.duration_since(front)))
                }
            };

            match wait {
                None => return Ok(()),
                Some(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay.max(Duration::from_millis(1))) => {}
                        _ = cancel.cancelled() => {
                            return Err(CoreError::Cancelled(format!("acquire on {bucket} aborted: shutting down")));
                        }
                    }
                }
            }
        }
    }

    /// Number of admissions currently inside the trailing window for `bucket`.
    /// Exposed for tests and metrics, not part of the blocking contract.
    pub fn current_load(&self, bucket: &str, window: Duration) -> usize {
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(bucket) {
            Some(b) => b.trim(window, Instant::now()),
            None => 0,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_limit_without_waiting() {
        let limiter = RateLimiter::new();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire("test", 5, Duration::from_secs(10), &cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(limiter.current_load("test", Duration::from_secs(10)), 5);
    }

    #[tokio::test]
    async fn blocks_past_limit_until_window_clears() {
        let limiter = RateLimiter::new();
        let cancel = CancellationToken::new();
        let window = Duration::from_millis(200);
        for _ in 0..3 {
            limiter.acquire("burst", 3, window, &cancel).await.unwrap();
        }
        let start = Instant::now();
        limiter.acquire("burst", 3, window, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn buckets_are_independent() {
        let limiter = RateLimiter::new();
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            limiter.acquire("a", 3, Duration::from_secs(5), &cancel).await.unwrap();
        }
        let start = Instant::now();
        limiter.acquire("b", 3, Duration::from_secs(5), &cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_a_blocked_acquire() {
        let limiter = RateLimiter::new();
        let cancel = CancellationToken::new();
        let window = Duration::from_secs(5);
        for _ in 0..2 {
            limiter.acquire("stuck", 2, window, &cancel).await.unwrap();
        }

        let limiter = Arc::new(limiter);
        let waiter_limiter = limiter.clone();
        let waiter_cancel = cancel.clone();
        let waiter = tokio::spawn(async move {
            waiter_limiter.acquire("stuck", 2, window, &waiter_cancel).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("acquire should unblock promptly once cancelled")
            .unwrap();
        assert!(matches!(result, Err(CoreError::Cancelled(_))));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Invariant 3: regardless of limit/window, `current_load` never
        /// reports more than `limit` admissions inside the trailing window.
        #[test]
        fn current_load_never_exceeds_limit(limit in 1u32..6, window_ms in 20u64..80, admissions in 1u32..12) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let limiter = RateLimiter::new();
                let cancel = CancellationToken::new();
                let window = Duration::from_millis(window_ms);
                for _ in 0..admissions {
                    limiter.acquire("bucket", limit, window, &cancel).await.unwrap();
                    assert!(limiter.current_load("bucket", window) <= limit as usize);
                }
            });
        }
    }
}
