//! Retry policy for transient remote failures.
//!
//! Exponential backoff with random jitter and bounded attempts. The policy
//! is pure data plus delay arithmetic; `chat-client` drives it around the
//! actual async operations.

use std::time::Duration;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum total attempts (first try included).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base: Duration,
    /// Upper bound on the exponential component.
    pub cap: Duration,
    /// Maximum random jitter added on top of each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(10),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (single attempt).
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based: the delay after the
    /// `attempt`-th failure).
    ///
    /// Formula: `min(cap, base * 2^(attempt-1)) + random(0..=max_jitter)`.
    /// Jitter prevents a thundering herd of clients retrying in lockstep
    /// after a shared outage.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base_ms = self.base.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(1u64 << exp)
            .min(self.cap.as_millis() as u64);
        Duration::from_millis(delay_ms) + random_jitter(self.max_jitter)
    }

    /// Whether `attempt` failures exhaust the policy.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Random jitter in `0..=max`.
fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1))
}
