//! Bounded exponential backoff.

use crate::config::ResilienceConfig;
use std::time::Duration;

/// How many times to try a call and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}
