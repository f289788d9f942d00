//! Clock abstraction for determinism.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Abstraction over system time so deadlines are reproducible in tests.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the instant `delay` from now, saturating at the far future.
    fn after(&self, delay: Duration) -> DateTime<Utc> {
        let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        self.now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
