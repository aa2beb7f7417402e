//! Shared token bucket for LLM calls.
//!
//! Callers that find the bucket empty wait for the next token; requests are
//! never dropped.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A full bucket. `capacity` and `refill_per_second` must be positive.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_second: refill_per_second.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_per_second)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;
    }

    /// Take one token, waiting as long as needed.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_second)
            };
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limiter exhausted, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token only if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn starts_full() {
        let bucket = TokenBucket::new(3, 1.0);
        assert!(bucket.available().await >= 3.0 - f64::EPSILON);
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test]
    async fn exhausted_bucket_blocks_instead_of_dropping() {
        let bucket = TokenBucket::new(1, 20.0);
        bucket.acquire().await;

        let start = Instant::now();
        bucket.acquire().await;
        // One token per 50ms
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn concurrent_callers_all_get_through() {
        let bucket = Arc::new(TokenBucket::new(2, 50.0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let bucket = Arc::clone(&bucket);
            handles.push(tokio::spawn(async move { bucket.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(bucket.available().await <= 2.0);
    }

    #[test]
    fn from_config_uses_quota() {
        let bucket = TokenBucket::from_config(&RateLimitConfig {
            capacity: 7,
            refill_per_second: 1.5,
        });
        assert_eq!(bucket.capacity, 7.0);
        assert_eq!(bucket.refill_per_second, 1.5);
    }
}
