//! Global send-rate limiter (token bucket).
//!
//! One limiter is shared by the whole worker pool, so the ceiling holds no
//! matter how many workers run:
//!
//! ```text
//! rate 200/s, burst 5
//! - bucket starts with 5 tokens
//! - tokens refill at 200/s up to 5
//! - over any window W, sends <= 200 * W + 5
//! ```
//!
//! Waiters reserve a token up front (the balance may go negative) and sleep
//! until it would have been refilled, so concurrent waiters queue up behind
//! each other instead of racing for the same token.

use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Rate limiter wait cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    /// `None` when the configured rate is not positive (unthrottled).
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        if rate_per_second <= 0.0 || !rate_per_second.is_finite() {
            tracing::warn!(rate_per_second, "Send rate not positive, limiter disabled");
            return Self { bucket: None };
        }
        let capacity = f64::from(burst.max(1));
        Self {
            bucket: Some(Mutex::new(TokenBucket {
                tokens: capacity,
                capacity,
                refill_rate: rate_per_second,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        let Some(bucket) = &self.bucket else {
            return true;
        };
        let mut bucket = bucket.lock();
        bucket.refill();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait for a token. Fails only if `cancel` fires first, in which case the
    /// reserved token is handed back.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), LimiterError> {
        if cancel.is_cancelled() {
            return Err(LimiterError::Cancelled);
        }

        let wait = self.reserve();
        if wait.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = cancel.cancelled() => {
                self.release();
                Err(LimiterError::Cancelled)
            }
        }
    }

    /// Reserve one token and return how long until it is actually available.
    fn reserve(&self) -> Duration {
        let Some(bucket) = &self.bucket else {
            return Duration::ZERO;
        };
        let mut bucket = bucket.lock();
        bucket.refill();
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / bucket.refill_rate)
        }
    }

    fn release(&self) {
        if let Some(bucket) = &self.bucket {
            let mut bucket = bucket.lock();
            bucket.refill();
            bucket.tokens = (bucket.tokens + 1.0).min(bucket.capacity);
        }
    }
}
