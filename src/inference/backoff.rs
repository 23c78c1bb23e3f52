//! Retry/give-up decisions for rate-limited requests

use std::time::Duration;

/// HTTP status the service uses for rate limiting
pub const RATE_LIMIT_STATUS: u16 = 429;

/// Outcome of consulting a [`BackoffPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Wait this long, then send the request again
    Retry(Duration),
    /// Stop and report the failure
    GiveUp,
}

/// Exponential backoff that only ever retries HTTP 429
///
/// `attempt` is the number of attempts already made for the request.
/// Pure and deterministic: no clock, no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay_ms: u64,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `base * 2^attempt`, saturating instead of overflowing
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier))
    }

    pub fn decide(&self, attempt: u32, status: u16) -> BackoffDecision {
        if status != RATE_LIMIT_STATUS || attempt >= self.max_attempts {
            return BackoffDecision::GiveUp;
        }
        BackoffDecision::Retry(self.delay_for_attempt(attempt))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(1_000, 4)
    }
}
