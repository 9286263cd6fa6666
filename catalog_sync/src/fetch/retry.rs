//! Retry policy: exponential backoff with random jitter

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// How often and how patiently a transient fetch failure is retried
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Backoff before retrying after failed attempt number `attempt` (1-based),
    /// without jitter: `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let millis = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(millis.min(self.max_delay_ms))
    }

    /// Backoff plus up to 50% random jitter, still capped at `max_delay`.
    ///
    /// A server-supplied `Retry-After` raises the floor of the delay.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter_cap = backoff.as_millis() as u64 / 2;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };
        let delay = (backoff + Duration::from_millis(jitter)).max(retry_after.unwrap_or_default());
        delay.min(self.max_delay())
    }
}
