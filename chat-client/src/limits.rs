//! Send-rate gating.
//!
//! Enforced by the caller side of the send pipeline, before a message id
//! is even generated: a minimum interval between messages plus a sliding
//! per-minute window. A rejection here has no side effects.

use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use chat_types::ChatError;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Send-rate configuration.
#[derive(Debug, Clone)]
pub struct SendLimits {
    /// Minimum interval between two sends.
    pub min_interval: Duration,
    /// Sliding-window cap on sends per minute.
    pub max_per_minute: u32,
}

impl Default for SendLimits {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_per_minute: 30,
        }
    }
}

/// The send gate combining both limits.
///
/// [`SendGate::acquire`] checks and records in one step: with a windowed
/// limiter a successful check consumes a quota cell, so splitting
/// "can send" from "record sent" would invite double-counting.
pub struct SendGate {
    limits: SendLimits,
    window: DirectLimiter,
    last_send: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for SendGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendGate")
            .field("limits", &self.limits)
            .finish()
    }
}

impl SendGate {
    /// Create a gate from the given limits.
    ///
    /// # Panics
    ///
    /// Panics if `max_per_minute` is zero.
    pub fn new(limits: SendLimits) -> Self {
        let per_minute =
            NonZeroU32::new(limits.max_per_minute).expect("max_per_minute must be > 0");
        Self {
            window: RateLimiter::direct(Quota::per_minute(per_minute)),
            last_send: Mutex::new(None),
            limits,
        }
    }

    /// Acquire permission for one send, recording it on success.
    pub fn acquire(&self) -> Result<(), ChatError> {
        let mut last = self.last_send.lock().unwrap();

        if let Some(at) = *last {
            let since = at.elapsed();
            if since < self.limits.min_interval {
                let wait = self.limits.min_interval - since;
                return Err(ChatError::RateLimited {
                    reason: format!("wait {}ms before sending another message", wait.as_millis()),
                });
            }
        }

        self.window.check().map_err(|_| ChatError::RateLimited {
            reason: "message rate limit exceeded".into(),
        })?;

        *last = Some(Instant::now());
        Ok(())
    }
}
