//! Clock abstraction for deterministic scheduling tests.
//!
//! Mirrors the [`crate::runtime::TaskSpawner`] pattern: the scheduler and
//! worker depend on a trait object rather than `tokio::time` directly, so
//! tests can advance time manually instead of sleeping in real time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

/// Abstraction over wall-clock time and sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends the caller for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the system clock and `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually-advanced clock for deterministic tests.
///
/// `sleep` resolves immediately; advance the clock with [`ManualClock::advance`]
/// between assertions instead of waiting in real time.
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock starting at the given UTC time.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        self.millis
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }

    async fn sleep(&self, _duration: Duration) {
        // Resolves immediately; tests advance the clock explicitly instead.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances_on_request() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));

        clock.sleep(Duration::from_secs(999)).await;
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }
}
