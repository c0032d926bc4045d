//! Injectable time source for time-based stages.
//!
//! A [`Clock`] is built once and handed to every stage that waits on time.
//! The system clock follows wall time. The virtual clock pauses the tokio
//! timer of the current runtime: sleeps resolve as soon as the runtime has
//! nothing else to do, and [`Clock::advance`] moves time forward explicitly,
//! so multi-second scenarios verify in microseconds.

use std::time::Duration;

use tokio::time::{Instant, Interval, Sleep};

use crate::core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockKind {
    System,
    Virtual,
}

/// A shared, read-only handle to the time source.
#[derive(Debug, Clone)]
pub struct Clock {
    kind: ClockKind,
    origin: Instant,
}

impl Clock {
    /// Real time.
    pub fn system() -> Self {
        Self {
            kind: ClockKind::System,
            origin: Instant::now(),
        }
    }

    /// Controllable time for tests.
    ///
    /// # Panics
    ///
    /// Pauses the timer of the current runtime, so it must be called from
    /// within a `current_thread` tokio runtime (the default of
    /// `#[tokio::test]`), at most once per runtime.
    pub fn virtual_time() -> Self {
        tokio::time::pause();
        tracing::debug!("virtual clock installed");
        Self {
            kind: ClockKind::Virtual,
            origin: Instant::now(),
        }
    }

    /// Whether this clock is controlled by the test.
    pub fn is_virtual(&self) -> bool {
        self.kind == ClockKind::Virtual
    }

    /// Current instant.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Time since this clock was created.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Future that resolves `duration` from now.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        tokio::time::sleep(duration)
    }

    /// Future that resolves at `deadline`.
    pub fn sleep_until(&self, deadline: Instant) -> Sleep {
        tokio::time::sleep_until(deadline)
    }

    /// Ticker whose first tick is one `period` from now.
    pub fn interval(&self, period: Duration) -> Interval {
        tokio::time::interval_at(Instant::now() + period, period)
    }

    /// Move virtual time forward by `duration`, firing every timer that
    /// falls due on the way.
    pub async fn advance(&self, duration: Duration) -> Result<()> {
        if !self.is_virtual() {
            return Err(Error::invalid_argument(
                "cannot advance the system clock",
            ));
        }
        tracing::trace!(?duration, "advance virtual clock");
        tokio::time::advance(duration).await;
        Ok(())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}
