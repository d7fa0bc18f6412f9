//! Exponential backoff policy
//!
//! Pure timing rules: how long to wait before the next attempt and when an
//! item has used up its attempts. No I/O and no jitter.

use std::time::Duration;

use civicsync_domain::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, MAX_BACKOFF_EXPONENT,
    MAX_RETRY_AFTER_SECS,
};
use civicsync_domain::RetryConfig;

/// Exponential backoff with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self { base_delay, max_delay: max_delay.max(base_delay), max_attempts }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `min(base * 2^attempt, max)`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base_millis = self.base_delay.as_millis() as u64;
        let max_millis = self.max_delay.as_millis() as u64;

        // Cap exponent to prevent overflow
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        let multiplier = 2_u64.saturating_pow(exponent);

        Duration::from_millis(base_millis.saturating_mul(multiplier).min(max_millis))
    }

    /// Server-requested wait, bounded by [`MAX_RETRY_AFTER_SECS`]
    pub fn retry_after_delay(&self, seconds: u64) -> Duration {
        Duration::from_secs(seconds.min(MAX_RETRY_AFTER_SECS))
    }

    /// Longest delay the queue will ever schedule
    pub fn max_scheduled_delay(&self) -> Duration {
        Duration::from_secs(MAX_RETRY_AFTER_SECS).max(self.max_delay)
    }

    /// An item with `attempt` recorded attempts may not be tried again
    pub fn is_terminal(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Delays preceding retries `0..max_attempts`
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|attempt| self.next_delay(attempt)).collect()
    }
}
