//! Subscriptions and the demand protocol.
//!
//! Every call to subscribe creates one [`Subscription`] shared between two
//! sides:
//!
//! - the producing task, which owns an [`Emitter`] and may only push a value
//!   after taking one unit of outstanding demand;
//! - the consuming side, usually an [`Upstream`] owned by the next operator,
//!   which grants demand with `request(n)` and receives signals in order.
//!
//! Signals travel over a per-subscription channel. The channel is unbounded
//! but its occupancy can never exceed the demand granted by the consumer.

use std::any::Any;
use std::fmt;
use std::future::poll_fn;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};
use crate::core::signal::Signal;
use crate::core::traits::Publisher;

/// Demand sentinel meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

/// Values an emitter pushes between voluntary yields to the runtime.
const YIELD_EVERY: u64 = 64;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a subscription, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

fn add_demand(current: u64, n: u64) -> u64 {
    if current == UNBOUNDED || n == UNBOUNDED {
        UNBOUNDED
    } else {
        current.saturating_add(n)
    }
}

struct DemandState {
    id: SubscriptionId,
    requested: AtomicU64,
    violated: CancellationToken,
    notify: Notify,
    token: CancellationToken,
}

impl DemandState {
    fn new() -> Self {
        Self {
            id: SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed)),
            requested: AtomicU64::new(0),
            violated: CancellationToken::new(),
            notify: Notify::new(),
            token: CancellationToken::new(),
        }
    }

    fn add(&self, n: u64) {
        let _ = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(add_demand(current, n))
            });
        // A stored permit covers the case where the emitter is not parked yet.
        self.notify.notify_one();
    }

    fn try_take(&self) -> bool {
        self.requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
                0 => None,
                UNBOUNDED => Some(UNBOUNDED),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

/// The live link between one subscriber and the publisher it subscribed to.
///
/// Cloning a subscription clones the handle, not the link: every clone
/// controls the same demand counter and cancellation flag.
#[derive(Clone)]
pub struct Subscription {
    state: Arc<DemandState>,
}

impl Subscription {
    fn new(state: Arc<DemandState>) -> Self {
        Self { state }
    }

    /// Identifier used in log records.
    pub fn id(&self) -> SubscriptionId {
        self.state.id
    }

    /// Grant `n` more values. `UNBOUNDED` lifts the limit for good.
    ///
    /// `request(0)` is a protocol violation: the producer terminates the
    /// subscription with an error signal.
    pub fn request(&self, n: u64) {
        if n == 0 {
            tracing::error!(subscription = %self.state.id, "request(0) violates the demand protocol");
            #[cfg(feature = "metrics")]
            crate::metrics::record_protocol_violation();
            self.state.violated.cancel();
            return;
        }
        if self.is_cancelled() {
            return;
        }
        self.state.add(n);
    }

    /// Signal disinterest. Idempotent.
    pub fn cancel(&self) {
        if !self.state.token.is_cancelled() {
            tracing::trace!(subscription = %self.state.id, "cancel");
            self.state.token.cancel();
        }
    }

    /// Whether `cancel` has been called on any clone of this handle.
    pub fn is_cancelled(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// Demand granted but not yet consumed by the producer.
    pub fn requested(&self) -> u64 {
        self.state.requested.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.state.id)
            .field("requested", &self.requested())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Producer-side handle of a subscription.
///
/// A publisher's `produce` body receives `&mut Emitter` and pushes values
/// through it. Terminal signals are sent by the runtime when `produce`
/// returns, so a body cannot complete twice or emit after completing.
pub struct Emitter<T> {
    state: Arc<DemandState>,
    tx: mpsc::UnboundedSender<Signal<T>>,
    emitted: u64,
}

impl<T: Send + 'static> Emitter<T> {
    fn new(state: Arc<DemandState>, tx: mpsc::UnboundedSender<Signal<T>>) -> Self {
        Self {
            state,
            tx,
            emitted: 0,
        }
    }

    /// Identifier of the subscription this emitter feeds.
    pub fn id(&self) -> SubscriptionId {
        self.state.id
    }

    /// Outstanding downstream demand.
    pub fn requested(&self) -> u64 {
        self.state.requested.load(Ordering::Acquire)
    }

    /// Number of values pushed so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Whether the downstream side has gone away.
    pub fn is_cancelled(&self) -> bool {
        self.state.token.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the subscription is cancelled.
    pub async fn cancelled(&self) {
        self.state.token.cancelled().await
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.state.violated.is_cancelled() {
            return Err(invalid_request());
        }
        Ok(())
    }

    /// Push one value, waiting for demand if none is outstanding.
    ///
    /// Returns `Err(Error::Cancelled)` once the subscriber has cancelled; the
    /// producer should propagate it with `?`.
    pub async fn emit(&mut self, item: T) -> Result<()> {
        if self.emitted % YIELD_EVERY == YIELD_EVERY - 1 {
            // Unbounded demand never parks the producer on its own.
            tokio::task::yield_now().await;
        }
        loop {
            self.check()?;
            if self.state.try_take() {
                return self.push(item);
            }
            tokio::select! {
                _ = self.state.notify.notified() => {}
                _ = self.state.token.cancelled() => {}
            }
        }
    }

    /// Push one value only if demand is outstanding right now.
    ///
    /// Sources that cannot hold values back (such as `interval`) use this and
    /// surface a slow consumer as `Error::Overflow`.
    pub fn try_emit(&mut self, item: T) -> Result<()> {
        self.check()?;
        if !self.state.try_take() {
            return Err(Error::overflow(format!(
                "no outstanding demand for value #{} on {}",
                self.emitted, self.state.id
            )));
        }
        self.push(item)
    }

    fn push(&mut self, item: T) -> Result<()> {
        self.emitted += 1;
        #[cfg(feature = "metrics")]
        crate::metrics::record_signal("next");
        self.tx
            .send(Signal::Next(item))
            .map_err(|_| Error::Cancelled)
    }

    fn finish(self, outcome: Option<Result<()>>) {
        let id = self.state.id;
        if self.state.token.is_cancelled() {
            tracing::trace!(subscription = %id, emitted = self.emitted, "cancelled");
            return;
        }
        let signal = match outcome {
            None | Some(Err(Error::Cancelled)) => {
                tracing::trace!(subscription = %id, emitted = self.emitted, "stopped");
                return;
            }
            Some(Ok(())) => {
                tracing::trace!(subscription = %id, emitted = self.emitted, "complete");
                Signal::Complete
            }
            Some(Err(error)) => {
                if matches!(error, Error::Protocol(_)) {
                    tracing::error!(subscription = %id, %error, "protocol violation");
                } else {
                    tracing::debug!(subscription = %id, %error, "error");
                }
                Signal::Error(error)
            }
        };
        #[cfg(feature = "metrics")]
        crate::metrics::record_signal(signal.kind());
        let _ = self.tx.send(signal);
    }
}

fn invalid_request() -> Error {
    Error::protocol("request(n) called with n == 0")
}

fn panicked(payload: Box<dyn Any + Send>) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::custom(format!("producer panicked: {message}"))
}

/// Start a subscription: spawn the publisher's `produce` body on `handle` and
/// return the consumer side.
pub(crate) fn launch<P>(
    publisher: Arc<P>,
    handle: &Handle,
) -> (Subscription, mpsc::UnboundedReceiver<Signal<P::Item>>)
where
    P: Publisher,
{
    let state = Arc::new(DemandState::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = Subscription::new(Arc::clone(&state));
    let token = state.token.clone();
    let violated = state.violated.clone();

    tracing::trace!(subscription = %state.id, "subscribe");
    #[cfg(feature = "metrics")]
    crate::metrics::record_subscribe();

    handle.spawn(async move {
        let mut emitter = Emitter::new(state, tx);
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            _ = violated.cancelled() => Some(Err(invalid_request())),
            result = AssertUnwindSafe(publisher.produce(&mut emitter)).catch_unwind() => {
                Some(result.unwrap_or_else(|panic| Err(panicked(panic))))
            }
        };
        emitter.finish(outcome);
    });

    (subscription, rx)
}

/// Consumer-side handle used by operators to pull from their upstream.
///
/// In prefetch mode the handle requests demand in batches on its own,
/// topping up once three quarters of a batch has been consumed. In manual
/// mode (prefetch 0) the owner calls [`Upstream::request`] itself.
///
/// Dropping an `Upstream` cancels the subscription.
pub struct Upstream<T> {
    subscription: Subscription,
    rx: mpsc::UnboundedReceiver<Signal<T>>,
    prefetch: u64,
    limit: u64,
    outstanding: u64,
    budget: u64,
    terminated: bool,
}

impl<T: Send + 'static> Upstream<T> {
    /// Subscribe on the current runtime with batched demand.
    pub fn subscribe<P>(publisher: Arc<P>, prefetch: u64) -> Self
    where
        P: Publisher<Item = T>,
    {
        Self::subscribe_on(publisher, &Handle::current(), prefetch)
    }

    /// Subscribe with the producing task spawned on `handle`.
    pub fn subscribe_on<P>(publisher: Arc<P>, handle: &Handle, prefetch: u64) -> Self
    where
        P: Publisher<Item = T>,
    {
        let (subscription, rx) = launch(publisher, handle);
        Self {
            subscription,
            rx,
            prefetch,
            limit: prefetch / 4,
            outstanding: 0,
            budget: UNBOUNDED,
            terminated: false,
        }
    }

    /// Subscribe without requesting anything; demand comes from `request`.
    pub fn manual<P>(publisher: Arc<P>) -> Self
    where
        P: Publisher<Item = T>,
    {
        Self::subscribe(publisher, 0)
    }

    /// Subscribe with batched demand that never exceeds `total` values
    /// over the life of the subscription.
    pub fn bounded<P>(publisher: Arc<P>, prefetch: u64, total: u64) -> Self
    where
        P: Publisher<Item = T>,
    {
        let mut upstream = Self::subscribe(publisher, prefetch.min(total));
        upstream.budget = total;
        upstream
    }

    /// The underlying subscription.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Grant demand explicitly.
    pub fn request(&mut self, n: u64) {
        self.outstanding = add_demand(self.outstanding, n);
        self.subscription.request(n);
    }

    /// Cancel the upstream subscription.
    pub fn cancel(&mut self) {
        self.subscription.cancel();
    }

    fn replenish(&mut self) {
        if self.prefetch == 0 || self.outstanding > self.limit || self.budget == 0 {
            return;
        }
        let mut n = self.prefetch - self.outstanding.min(self.prefetch);
        if self.budget != UNBOUNDED {
            n = n.min(self.budget);
            self.budget -= n;
        }
        if n > 0 {
            self.request(n);
        }
    }

    /// Poll for the next raw signal. `None` once the channel is exhausted.
    pub fn poll_signal(&mut self, cx: &mut Context<'_>) -> Poll<Option<Signal<T>>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        self.replenish();
        let signal = ready!(self.rx.poll_recv(cx));
        match &signal {
            Some(Signal::Next(_)) => {
                if self.outstanding != UNBOUNDED {
                    self.outstanding = self.outstanding.saturating_sub(1);
                }
            }
            _ => self.terminated = true,
        }
        Poll::Ready(signal)
    }

    /// Receive the next raw signal.
    pub async fn next_signal(&mut self) -> Option<Signal<T>> {
        poll_fn(|cx| self.poll_signal(cx)).await
    }

    /// Poll for the next value: `Ok(None)` on completion, `Err` on an error
    /// signal or when the producing task died without a terminal signal.
    pub fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<T>>> {
        let already_terminated = self.terminated;
        match ready!(self.poll_signal(cx)) {
            Some(Signal::Next(item)) => Poll::Ready(Ok(Some(item))),
            Some(Signal::Complete) => Poll::Ready(Ok(None)),
            Some(Signal::Error(error)) => Poll::Ready(Err(error)),
            None if already_terminated => Poll::Ready(Ok(None)),
            None => {
                tracing::warn!(
                    subscription = %self.subscription.id(),
                    "producer stopped without a terminal signal"
                );
                Poll::Ready(Err(Error::ChannelClosed))
            }
        }
    }

    /// Receive the next value.
    pub async fn next(&mut self) -> Result<Option<T>> {
        poll_fn(|cx| self.poll_next(cx)).await
    }
}

impl<T> Drop for Upstream<T> {
    fn drop(&mut self) {
        if !self.terminated {
            self.subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::PublisherExt;
    use crate::sources::{just, IterSource, NeverSource};

    #[tokio::test]
    async fn test_nothing_produced_without_demand() {
        let mut upstream = Upstream::manual(Arc::new(just(vec![1, 2, 3])));
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), upstream.next_signal())
                .await;
        assert!(waited.is_err());

        upstream.request(2);
        assert!(matches!(upstream.next_signal().await, Some(Signal::Next(1))));
        assert!(matches!(upstream.next_signal().await, Some(Signal::Next(2))));
        assert_eq!(upstream.subscription().requested(), 0);
    }

    #[tokio::test]
    async fn test_demand_is_saturating_and_unbounded_sticks() {
        let upstream = Upstream::manual(Arc::new(NeverSource::<i32>::new()));
        let subscription = upstream.subscription().clone();
        subscription.request(UNBOUNDED - 1);
        subscription.request(10);
        assert_eq!(subscription.requested(), UNBOUNDED);
    }

    #[tokio::test]
    async fn test_request_zero_is_an_error_signal() {
        let mut upstream = Upstream::manual(Arc::new(IterSource::new(vec!["a"])));
        upstream.subscription().request(0);
        match upstream.next_signal().await {
            Some(Signal::Error(Error::Protocol(_))) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_zero_ends_a_silent_pipeline() {
        let mut upstream = Upstream::manual(Arc::new(NeverSource::<u8>::new().map(|n| n + 1)));
        upstream.request(1);
        upstream.subscription().request(0);
        match upstream.next_signal().await {
            Some(Signal::Error(Error::Protocol(_))) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut upstream = Upstream::manual(Arc::new(NeverSource::<u8>::new()));
        upstream.request(1);
        upstream.cancel();
        upstream.cancel();
        assert!(upstream.subscription().is_cancelled());
        // Cancelled producers go quiet instead of completing.
        assert!(upstream.next_signal().await.is_none());
    }

    #[tokio::test]
    async fn test_prefetch_completes_sequence() {
        let mut upstream = Upstream::subscribe(Arc::new(IterSource::new(0..100)), 8);
        let mut seen = Vec::new();
        while let Some(item) = upstream.next().await.unwrap() {
            seen.push(item);
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bounded_upstream_never_over_requests() {
        let mut upstream = Upstream::bounded(Arc::new(NeverSource::<u8>::new()), 32, 5);
        let _ = tokio::time::timeout(std::time::Duration::from_millis(5), upstream.next()).await;
        assert_eq!(upstream.subscription().requested(), 5);
    }
}
