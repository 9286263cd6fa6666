//! Per-source token bucket
//!
//! Each source gets `requests` tokens per `per_secs` seconds. A caller that
//! finds the bucket empty sleeps until the next token refills; the wait is
//! never longer than the refill time of a single token.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Request budget published by an upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBudget {
    pub requests: u32,
    pub per_secs: u64,
}

impl Default for RateLimitBudget {
    fn default() -> Self {
        Self {
            requests: 10,
            per_secs: 1,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A full bucket for the given budget
    pub fn new(budget: RateLimitBudget) -> Self {
        let capacity = f64::from(budget.requests.max(1));
        let refill_per_sec = capacity / budget.per_secs.max(1) as f64;
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            log::debug!("Rate limiting: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (after refilling)
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}
