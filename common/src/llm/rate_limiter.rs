//! Bounded-worker-pool rate limiting for `ChatModel`/`EmbeddingModel` wrappers,
//! generalizing `retrieval-pipeline/src/reranking/mod.rs`'s `RerankerPool`
//! semaphore-lease idiom from one limit (concurrency) to the two spec §4.4
//! requires (requests-per-minute and tokens-per-minute), on top of a
//! concurrency semaphore for `concurrent_requests`.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// A sliding-window limiter: at most `limit` units consumed in any rolling
/// `window`. Used for both the requests/minute and tokens/minute policies.
struct Window {
    limit: u32,
    window: Duration,
    consumed: u32,
    window_start: Instant,
}

impl Window {
    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            consumed: 0,
            window_start: Instant::now(),
        }
    }

    /// Returns how long the caller should wait before `amount` more units fit.
    fn reserve(&mut self, amount: u32) -> Duration {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.consumed = 0;
        }
        if self.consumed.saturating_add(amount) <= self.limit {
            self.consumed = self.consumed.saturating_add(amount);
            return Duration::ZERO;
        }
        self.window_start + self.window - now
    }
}

/// Holds a concurrency permit for the duration of one in-flight call.
pub struct RateLimitLease {
    _permit: OwnedSemaphorePermit,
}

/// Enforces `concurrent_requests`, `requests_per_minute`, and
/// `tokens_per_minute` for one named model.
pub struct RateLimiter {
    concurrency: Arc<Semaphore>,
    requests: Mutex<Window>,
    tokens: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(concurrent_requests: usize, requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(concurrent_requests.max(1))),
            requests: Mutex::new(Window::new(requests_per_minute, Duration::from_secs(60))),
            tokens: Mutex::new(Window::new(tokens_per_minute, Duration::from_secs(60))),
        }
    }

    /// Blocks until a concurrency slot and rate-limit budget for
    /// `estimated_tokens` are both available, then returns a lease that
    /// releases the concurrency slot on drop.
    pub async fn acquire(&self, estimated_tokens: u32) -> RateLimitLease {
        loop {
            let wait = {
                let mut requests = self.requests.lock().await;
                let mut tokens = self.tokens.lock().await;
                let req_wait = requests.reserve(1);
                if req_wait > Duration::ZERO {
                    req_wait
                } else {
                    let tok_wait = tokens.reserve(estimated_tokens);
                    if tok_wait > Duration::ZERO {
                        // Undo the request reservation; it will be retried next loop.
                        requests.consumed = requests.consumed.saturating_sub(1);
                    }
                    tok_wait
                }
            };
            if wait == Duration::ZERO {
                break;
            }
            tokio::time::sleep(wait).await;
        }
        let permit = Arc::clone(&self.concurrency)
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        RateLimitLease { _permit: permit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_within_budget() {
        let limiter = RateLimiter::new(2, 10, 10_000);
        let _a = limiter.acquire(100).await;
        let _b = limiter.acquire(100).await;
    }
}
