//! Retry policy: how often a fragment is re-sent unchanged, and when.

use std::time::Duration;

use crate::config::DispatcherConfig;

/// Re-send policy for failed fragments.
///
/// A fragment is re-sent as-is while `can_retry` allows it; after that the
/// dispatcher splits it instead.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Sends of one fragment before it is split (the first send counts).
    pub max_attempts: u32,

    /// Base delay for the first re-send.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
        }
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(
            config.max_job_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
            config.retry_multiplier,
        )
    }

    /// Split on the first failure, never re-send.
    pub fn split_immediately() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Whether a fragment sent `attempts` times may be sent again.
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next send, given the sends already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// With base_delay=2s, multiplier=2.0:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}
