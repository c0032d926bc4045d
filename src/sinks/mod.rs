//! Subscriber implementations for the fluxweld library.
//!
//! This module drives [`Subscriber`]s from a subscription and provides the
//! stock subscribers: a collecting one for tests and handlers, a closure
//! based one, and a `Stream` adapter.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;
use tokio::runtime::Handle;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};
use crate::core::signal::Signal;
use crate::core::subscription::{launch, Subscription, Upstream, UNBOUNDED};
use crate::core::traits::{Publisher, Subscriber};

/// Subscribe `subscriber` to `publisher` on the current runtime.
///
/// Signals are delivered from a dedicated task, one call at a time and in
/// order. Values that arrive after the subscriber cancelled are dropped.
pub(crate) fn subscribe<P, S>(publisher: Arc<P>, mut subscriber: S) -> Subscription
where
    P: Publisher,
    S: Subscriber<Item = P::Item>,
{
    let (subscription, mut signals) = launch(publisher, &Handle::current());
    let control = subscription.clone();
    tokio::spawn(async move {
        subscriber.on_subscribe(control.clone()).await;
        while let Some(signal) = signals.recv().await {
            match signal {
                Signal::Next(item) => {
                    if control.is_cancelled() {
                        return;
                    }
                    subscriber.on_next(item).await;
                }
                Signal::Complete => {
                    subscriber.on_complete().await;
                    return;
                }
                Signal::Error(error) => {
                    subscriber.on_error(error).await;
                    return;
                }
            }
        }
        if !control.is_cancelled() {
            tracing::warn!(subscription = %control.id(), "producer stopped without a terminal signal");
            subscriber.on_error(Error::ChannelClosed).await;
        }
    });
    subscription
}

struct CollectState<T> {
    items: TokioMutex<Vec<T>>,
    outcome: TokioMutex<Option<Result<()>>>,
    subscription: TokioMutex<Option<Subscription>>,
    terminated: CancellationToken,
    initial_request: u64,
}

/// A subscriber that records every value and the terminal signal.
///
/// Clones share the same record, so one clone can be handed to `subscribe`
/// while another waits for the outcome.
pub struct CollectSubscriber<T> {
    state: Arc<CollectState<T>>,
}

impl<T: Send + 'static> CollectSubscriber<T> {
    /// Create a collector that requests everything
    pub fn new() -> Self {
        Self::with_initial_request(UNBOUNDED)
    }

    /// Create a collector that initially requests `n` values
    pub fn with_initial_request(n: u64) -> Self {
        Self {
            state: Arc::new(CollectState {
                items: TokioMutex::new(Vec::new()),
                outcome: TokioMutex::new(None),
                subscription: TokioMutex::new(None),
                terminated: CancellationToken::new(),
                initial_request: n,
            }),
        }
    }

    /// Request more values once subscribed
    pub async fn request(&self, n: u64) {
        if let Some(subscription) = self.state.subscription.lock().await.as_ref() {
            subscription.request(n);
        }
    }

    /// Cancel the subscription once subscribed
    pub async fn cancel(&self) {
        if let Some(subscription) = self.state.subscription.lock().await.as_ref() {
            subscription.cancel();
        }
    }

    /// Number of values received so far
    pub async fn len(&self) -> usize {
        self.state.items.lock().await.len()
    }

    /// Whether no value has been received yet
    pub async fn is_empty(&self) -> bool {
        self.state.items.lock().await.is_empty()
    }

    /// Whether a terminal signal has been received
    pub fn is_terminated(&self) -> bool {
        self.state.terminated.is_cancelled()
    }

    /// Wait for the terminal signal and take the recorded values, or the
    /// error signal.
    pub async fn wait(&self) -> Result<Vec<T>> {
        self.state.terminated.cancelled().await;
        let outcome = self.state.outcome.lock().await.clone();
        match outcome {
            Some(Err(error)) => Err(error),
            _ => Ok(std::mem::take(&mut *self.state.items.lock().await)),
        }
    }
}

impl<T: Send + 'static> Default for CollectSubscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Subscriber for CollectSubscriber<T> {
    type Item = T;

    async fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(self.state.initial_request);
        *self.state.subscription.lock().await = Some(subscription);
    }

    async fn on_next(&mut self, item: T) {
        self.state.items.lock().await.push(item);
    }

    async fn on_error(&mut self, error: Error) {
        *self.state.outcome.lock().await = Some(Err(error));
        self.state.terminated.cancel();
    }

    async fn on_complete(&mut self) {
        *self.state.outcome.lock().await = Some(Ok(()));
        self.state.terminated.cancel();
    }
}

/// A subscriber that hands every value to a closure and requests everything.
pub struct FnSubscriber<F, T> {
    on_next: F,
    _marker: PhantomData<fn(T)>,
}

impl<F, T> FnSubscriber<F, T>
where
    F: FnMut(T) + Send + 'static,
{
    /// Create a new closure subscriber
    pub fn new(on_next: F) -> Self {
        Self {
            on_next,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Subscriber for FnSubscriber<F, T>
where
    F: FnMut(T) + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    async fn on_next(&mut self, item: T) {
        (self.on_next)(item);
    }
}

/// A `Stream` over a subscription that requests one value at a time.
///
/// Yields `Ok` values, then ends on completion; an error signal is yielded
/// once as `Err` and ends the stream.
pub struct SignalStream<T> {
    upstream: Upstream<T>,
    done: bool,
}

impl<T: Send + 'static> SignalStream<T> {
    /// Subscribe to `publisher` on the current runtime
    pub fn new<P>(publisher: Arc<P>) -> Self
    where
        P: Publisher<Item = T>,
    {
        Self {
            upstream: Upstream::subscribe(publisher, 1),
            done: false,
        }
    }

    /// The underlying subscription
    pub fn subscription(&self) -> &Subscription {
        self.upstream.subscription()
    }
}

impl<T: Send + 'static> Stream for SignalStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.upstream.poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Some(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Ok(None)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Err(error)) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio_stream::StreamExt;

    use super::*;
    use crate::core::traits::PublisherExt;
    use crate::sources::{just, range, ErrorSource, IterSource};

    #[tokio::test]
    async fn test_collect_subscriber_records_values() {
        let collector = CollectSubscriber::new();
        just(vec!["a", "b", "c"]).subscribe(collector.clone());
        assert_eq!(collector.wait().await.unwrap(), vec!["a", "b", "c"]);
        assert!(collector.is_terminated());
    }

    #[tokio::test]
    async fn test_collect_subscriber_honours_demand() {
        let collector = CollectSubscriber::with_initial_request(2);
        IterSource::new(0u32..).subscribe(collector.clone());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(collector.len().await, 2);
        assert!(!collector.is_terminated());

        collector.request(3).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(collector.len().await, 5);
        collector.cancel().await;
    }

    #[tokio::test]
    async fn test_collect_subscriber_reports_error() {
        let collector = CollectSubscriber::<u8>::new();
        ErrorSource::new(Error::custom("bad")).subscribe(collector.clone());
        assert_eq!(collector.wait().await.unwrap_err().to_string(), "bad");
    }

    #[tokio::test]
    async fn test_subscribe_fn_sees_every_value() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let subscription = range(1, 10).subscribe_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert!(!subscription.is_cancelled());
    }

    #[tokio::test]
    async fn test_signal_stream_yields_results() {
        let items: Vec<_> = range(1, 3).into_stream().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item.is_ok()));

        let mut failing = ErrorSource::<u8>::new(Error::custom("x")).into_stream();
        assert!(failing.next().await.unwrap().is_err());
        assert!(failing.next().await.is_none());
    }
}
