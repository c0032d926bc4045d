//! Hot multicasting of one upstream subscription.
//!
//! [`Share`] turns a cold publisher into a hot one. The first subscriber
//! connects a single upstream subscription whose signals are broadcast to
//! every subscriber present at the time; a late subscriber only sees what is
//! emitted after it joined. When the upstream terminates, or the last
//! subscriber leaves, the connection is torn down and the next subscriber
//! starts a fresh one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::config::DEFAULT_PREFETCH;
use crate::core::error::{Error, Result};
use crate::core::signal::Signal;
use crate::core::subscription::{Emitter, Upstream};
use crate::core::traits::Publisher;

/// Signals a shared connection holds for subscribers that fall behind.
pub const DEFAULT_SHARE_CAPACITY: usize = 256;

struct Connection<T> {
    sender: broadcast::Sender<Signal<T>>,
    pump: JoinHandle<()>,
}

/// A hot view over one shared upstream subscription.
///
/// The upstream is drained as fast as it produces, independent of
/// subscriber demand. Each subscriber still only receives values it has
/// requested; one that falls more than `capacity` signals behind fails with
/// `Error::Overflow` once it asks for more.
pub struct Share<P: Publisher> {
    upstream: Arc<P>,
    capacity: usize,
    connection: Arc<TokioMutex<Option<Connection<P::Item>>>>,
}

impl<P: Publisher> Share<P>
where
    P::Item: Clone,
{
    /// Create a new shared view of `upstream`
    pub fn new(upstream: P) -> Self {
        Self {
            upstream: Arc::new(upstream),
            capacity: DEFAULT_SHARE_CAPACITY,
            connection: Arc::new(TokioMutex::new(None)),
        }
    }

    /// Set how many signals a slow subscriber may lag behind
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    async fn join(&self) -> broadcast::Receiver<Signal<P::Item>> {
        let mut connection = self.connection.lock().await;
        if let Some(live) = connection.as_ref() {
            if !live.pump.is_finished() && live.sender.receiver_count() > 0 {
                return live.sender.subscribe();
            }
            live.pump.abort();
        }

        let (sender, receiver) = broadcast::channel(self.capacity.max(1));
        let pump = tokio::spawn(pump(Arc::clone(&self.upstream), sender.clone()));
        tracing::debug!(capacity = self.capacity, "shared upstream connected");
        *connection = Some(Connection { sender, pump });
        receiver
    }
}

impl<P: Publisher> Clone for Share<P> {
    fn clone(&self) -> Self {
        Self {
            upstream: Arc::clone(&self.upstream),
            capacity: self.capacity,
            connection: Arc::clone(&self.connection),
        }
    }
}

async fn pump<P>(upstream: Arc<P>, sender: broadcast::Sender<Signal<P::Item>>)
where
    P: Publisher,
    P::Item: Clone,
{
    let mut upstream = Upstream::subscribe(upstream, DEFAULT_PREFETCH);
    loop {
        let signal = upstream
            .next_signal()
            .await
            .unwrap_or(Signal::Error(Error::ChannelClosed));
        let terminal = signal.is_terminal();
        if sender.send(signal).is_err() {
            tracing::debug!("shared upstream has no subscribers left, disconnecting");
            return;
        }
        if terminal {
            return;
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for Share<P>
where
    P::Item: Clone,
{
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut receiver = self.join().await;
        loop {
            match receiver.recv().await {
                Ok(Signal::Next(item)) => emitter.emit(item).await?,
                Ok(Signal::Complete) => return Ok(()),
                Ok(Signal::Error(error)) => return Err(error),
                Err(RecvError::Lagged(missed)) => {
                    return Err(Error::overflow(format!(
                        "shared subscriber fell {missed} signals behind"
                    )))
                }
                Err(RecvError::Closed) => return Err(Error::ChannelClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::Clock;
    use crate::core::traits::PublisherExt;
    use crate::sources::{interval, range};
    use crate::verifier::StepVerifier;

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_values() {
        let clock = Clock::virtual_time();
        let ticks = interval(Duration::from_secs(1), &clock).share();

        let early = tokio::spawn(ticks.clone().take(4).collect_list().resolve());
        clock.sleep(Duration::from_millis(2500)).await;
        let late = tokio::spawn(ticks.clone().take(2).collect_list().resolve());

        assert_eq!(early.await.unwrap().unwrap(), Some(vec![0, 1, 2, 3]));
        assert_eq!(late.await.unwrap().unwrap(), Some(vec![2, 3]));
    }

    #[tokio::test]
    async fn test_terminated_share_reconnects() {
        let shared = range(1, 3).share();
        assert_eq!(
            shared.clone().collect_list().resolve().await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(shared.collect_list().resolve().await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_slow_subscriber_overflows() {
        let clock = Clock::virtual_time();
        let shared = interval(Duration::from_secs(1), &clock).share().capacity(4);
        StepVerifier::with_initial_request(shared, 1)
            .with_virtual_time(&clock)
            .expect_next(0)
            .expect_no_event(Duration::from_secs(10))
            .then_request(10)
            .expect_next(1)
            .expect_error_matches(|e| matches!(e, Error::Overflow(_)))
            .verify()
            .await
            .unwrap();
    }
}
