//! Scripted verification of a publisher's signals.
//!
//! A [`StepVerifier`] is built from a publisher and a list of expectations,
//! then [`verify`](StepVerifier::verify) subscribes, controls demand and
//! walks the script. On a virtual [`Clock`], waits advance virtual time so
//! time-based pipelines are checked without sleeping.
//!
//! ```rust
//! use fluxweld::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! StepVerifier::create(just(vec!["one", "two", "skip a few", "ninety nine"]).skip(3))
//!     .expect_next("ninety nine")
//!     .expect_complete()
//!     .verify()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::core::error::{Error, Result};
use crate::core::signal::Signal;
use crate::core::subscription::{Upstream, UNBOUNDED};
use crate::core::traits::{BoxPublisher, Publisher};

/// How long a step waits for a signal before the run fails.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

type ValueCheck<T> = Box<dyn Fn(&T) -> bool + Send>;
type ErrorCheck = Box<dyn Fn(&Error) -> bool + Send>;

enum Step<T> {
    Next { expected: String, check: ValueCheck<T> },
    NextCount(u64),
    NoEvent(Duration),
    Request(u64),
    Await(Duration),
    Cancel,
    Complete,
    Error { expected: String, check: ErrorCheck },
}

/// A script of expected signals for one subscription.
pub struct StepVerifier<T> {
    publisher: BoxPublisher<T>,
    initial_request: u64,
    steps: Vec<Step<T>>,
    clock: Option<Clock>,
    timeout: Duration,
}

impl<T: Debug + Send + 'static> StepVerifier<T> {
    /// Verify `publisher`, requesting everything on subscription
    pub fn create<P>(publisher: P) -> Self
    where
        P: Publisher<Item = T>,
    {
        Self::with_initial_request(publisher, UNBOUNDED)
    }

    /// Verify `publisher`, requesting `n` values on subscription; more demand
    /// comes from `then_request`
    pub fn with_initial_request<P>(publisher: P, n: u64) -> Self
    where
        P: Publisher<Item = T>,
    {
        Self {
            publisher: BoxPublisher::new(publisher),
            initial_request: n,
            steps: Vec::new(),
            clock: None,
            timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Measure and wait on `clock`; a virtual clock is advanced by `then_await`
    pub fn with_virtual_time(mut self, clock: &Clock) -> Self {
        self.clock = Some(clock.clone());
        self
    }

    /// Set how long a step may wait for a signal
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expect the next signal to be this value
    pub fn expect_next(mut self, value: T) -> Self
    where
        T: PartialEq,
    {
        self.steps.push(Step::Next {
            expected: format!("onNext({:?})", value),
            check: Box::new(move |actual: &T| *actual == value),
        });
        self
    }

    /// Expect these values, in order
    pub fn expect_next_sequence(mut self, values: impl IntoIterator<Item = T>) -> Self
    where
        T: PartialEq,
    {
        for value in values {
            self = self.expect_next(value);
        }
        self
    }

    /// Expect a value satisfying `predicate`
    pub fn expect_next_matches<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        self.steps.push(Step::Next {
            expected: "onNext(<value matching predicate>)".to_string(),
            check: Box::new(predicate),
        });
        self
    }

    /// Expect `count` values of any content
    pub fn expect_next_count(mut self, count: u64) -> Self {
        self.steps.push(Step::NextCount(count));
        self
    }

    /// Expect nothing at all to be signalled for `duration`
    pub fn expect_no_event(mut self, duration: Duration) -> Self {
        self.steps.push(Step::NoEvent(duration));
        self
    }

    /// Request `n` more values
    pub fn then_request(mut self, n: u64) -> Self {
        self.steps.push(Step::Request(n));
        self
    }

    /// Let `duration` pass
    pub fn then_await(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Await(duration));
        self
    }

    /// Cancel the subscription and end the script
    pub fn then_cancel(mut self) -> Self {
        self.steps.push(Step::Cancel);
        self
    }

    /// Expect the completion signal
    pub fn expect_complete(mut self) -> Self {
        self.steps.push(Step::Complete);
        self
    }

    /// Expect an error signal of any kind
    pub fn expect_error(mut self) -> Self {
        self.steps.push(Step::Error {
            expected: "onError(<any>)".to_string(),
            check: Box::new(|_: &Error| true),
        });
        self
    }

    /// Expect an error signal satisfying `predicate`
    pub fn expect_error_matches<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + 'static,
    {
        self.steps.push(Step::Error {
            expected: "onError(<error matching predicate>)".to_string(),
            check: Box::new(predicate),
        });
        self
    }

    /// Shorthand for `expect_complete().verify()`
    pub async fn verify_complete(self) -> Result<Duration> {
        self.expect_complete().verify().await
    }

    /// Subscribe and run the script.
    ///
    /// Returns the time the run took on the verifier's clock, or
    /// `Error::Verification` naming the first step that did not match.
    pub async fn verify(self) -> Result<Duration> {
        let Self {
            publisher,
            initial_request,
            steps,
            clock,
            timeout,
        } = self;
        let clock = clock.unwrap_or_default();
        let started = clock.now();

        let mut upstream = Upstream::manual(Arc::new(publisher));
        if initial_request > 0 {
            upstream.request(initial_request);
        }

        for (index, step) in steps.into_iter().enumerate() {
            match step {
                Step::Next { expected, check } => {
                    match receive(&mut upstream, &clock, timeout).await? {
                        Some(Signal::Next(value)) if check(&value) => {}
                        other => return Err(mismatch(index, &expected, other)),
                    }
                }
                Step::NextCount(count) => {
                    for _ in 0..count {
                        match receive(&mut upstream, &clock, timeout).await? {
                            Some(Signal::Next(_)) => {}
                            other => {
                                let expected = format!("{} values", count);
                                return Err(mismatch(index, &expected, other));
                            }
                        }
                    }
                }
                Step::NoEvent(duration) => {
                    tokio::select! {
                        _ = clock.sleep(duration) => {}
                        signal = upstream.next_signal() => {
                            let expected = format!("no signal for {:?}", duration);
                            return Err(mismatch(index, &expected, signal));
                        }
                    }
                }
                Step::Request(n) => upstream.request(n),
                Step::Await(duration) => {
                    if clock.is_virtual() {
                        clock.advance(duration).await?;
                    } else {
                        clock.sleep(duration).await;
                    }
                }
                Step::Cancel => {
                    upstream.cancel();
                    break;
                }
                Step::Complete => match receive(&mut upstream, &clock, timeout).await? {
                    Some(Signal::Complete) => {}
                    other => return Err(mismatch(index, "onComplete()", other)),
                },
                Step::Error { expected, check } => {
                    match receive(&mut upstream, &clock, timeout).await? {
                        Some(Signal::Error(error)) if check(&error) => {}
                        other => return Err(mismatch(index, &expected, other)),
                    }
                }
            }
            tracing::trace!(step = index, "step verified");
        }

        Ok(clock.now().saturating_duration_since(started))
    }
}

async fn receive<T: Send + 'static>(
    upstream: &mut Upstream<T>,
    clock: &Clock,
    timeout: Duration,
) -> Result<Option<Signal<T>>> {
    tokio::select! {
        signal = upstream.next_signal() => Ok(signal),
        _ = clock.sleep(timeout) => Err(Error::timeout(timeout.as_millis() as u64)),
    }
}

fn mismatch<T: Debug>(index: usize, expected: &str, actual: Option<Signal<T>>) -> Error {
    let actual = match actual {
        Some(signal) => signal.to_string(),
        None => "end of subscription without a terminal signal".to_string(),
    };
    tracing::debug!(step = index, expected, %actual, "verification failed");
    Error::verification(format!("step {}: expected {}, got {}", index, expected, actual))
}
