//! Clock-driven sources.

use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::core::error::{Error, Result};
use crate::core::subscription::Emitter;
use crate::core::traits::Publisher;

/// A publisher that emits 0, 1, 2, ... one `period` apart.
///
/// Ticks are not held back: if the subscriber has no outstanding demand
/// when a tick fires, the subscription fails with `Error::Overflow`.
pub struct IntervalSource {
    period: Duration,
    clock: Clock,
}

impl IntervalSource {
    /// Create a new interval source; the first value arrives after one period
    pub fn new(period: Duration, clock: &Clock) -> Self {
        Self {
            period,
            clock: clock.clone(),
        }
    }
}

/// Shorthand for [`IntervalSource::new`]
pub fn interval(period: Duration, clock: &Clock) -> IntervalSource {
    IntervalSource::new(period, clock)
}

#[async_trait]
impl Publisher for IntervalSource {
    type Item = u64;

    async fn produce(&self, emitter: &mut Emitter<u64>) -> Result<()> {
        if self.period.is_zero() {
            return Err(Error::invalid_argument("interval period must be positive"));
        }
        let mut ticker = self.clock.interval(self.period);
        let mut tick = 0u64;
        loop {
            ticker.tick().await;
            emitter.try_emit(tick)?;
            tick += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::PublisherExt;
    use crate::verifier::StepVerifier;

    #[tokio::test]
    async fn test_interval_ticks_on_virtual_time() {
        let clock = Clock::virtual_time();
        let elapsed = StepVerifier::create(interval(Duration::from_secs(1), &clock).take(3))
            .with_virtual_time(&clock)
            .expect_next_sequence([0, 1, 2])
            .expect_complete()
            .verify()
            .await
            .unwrap();
        assert!(elapsed >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_interval_without_demand_overflows() {
        let clock = Clock::virtual_time();
        StepVerifier::with_initial_request(interval(Duration::from_millis(100), &clock), 1)
            .with_virtual_time(&clock)
            .expect_next(0)
            .expect_error_matches(|e| matches!(e, Error::Overflow(_)))
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_period_is_rejected() {
        let clock = Clock::system();
        StepVerifier::create(interval(Duration::ZERO, &clock))
            .expect_error_matches(|e| matches!(e, Error::InvalidArgument(_)))
            .verify()
            .await
            .unwrap();
    }
}
