//! Redelivery policy for failed tasks.

use std::time::Duration;

/// How often, and how far apart, a failing task is delivered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total deliveries before a task is given up on, including the first.
    pub max_attempts: u32,
    /// Base delay, multiplied by the failed attempt number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before redelivering a task whose `attempt` just
    /// failed, or `None` if no attempts remain.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.backoff.saturating_mul(attempt.max(1)))
    }
}
