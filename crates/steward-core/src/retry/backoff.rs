//! Exponential backoff schedule for the durable retry queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use steward_types::config::RetryConfig;

/// `delay(index) = base_delay * multiplier^index`.
///
/// With the defaults (5 minutes, x3) indices 0, 1, 2 wait 5, 15 and 45
/// minutes. Overflow saturates instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: u32) -> Self {
        Self {
            base_delay,
            multiplier,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.base_delay(), config.multiplier)
    }

    /// Delay before the retry following attempt index `index`.
    pub fn delay_for(&self, index: u32) -> Duration {
        let factor = self.multiplier.checked_pow(index).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Wall-clock time of the next retry for attempt index `index`.
    pub fn next_retry_at(&self, now: DateTime<Utc>, index: u32) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay_for(index))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
