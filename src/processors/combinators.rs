//! Operators that coordinate several upstream publishers.
//!
//! Fan-in stages (`merge`, `flat_map`) drain every inner subscription from
//! its own task into one bounded channel and register it in a
//! [`SubscriptionArena`]. Inner errors bypass that channel: the first one is
//! raised on a [`FirstError`] that the stage watches while it waits for
//! values and while it waits for downstream demand, so it fails the stage at
//! once and the arena cancels every sibling. Pairing stages (`zip`) and
//! racing stages (`first`) poll their upstreams directly.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::config::{FlowConfig, DEFAULT_PREFETCH};
use crate::core::arena::SubscriptionArena;
use crate::core::error::{Error, Result};
use crate::core::signal::Signal;
use crate::core::subscription::{Emitter, Upstream};
use crate::core::traits::{Publisher, PublisherExt};

enum FanInEvent<T> {
    Next(T),
    Done(usize),
}

/// Slot for the first error raised by any inner subscription.
#[derive(Clone, Default)]
struct FirstError {
    slot: Arc<OnceCell<Error>>,
    raised: CancellationToken,
}

impl FirstError {
    fn raise(&self, error: Error) {
        if self.slot.set(error).is_ok() {
            self.raised.cancel();
        }
    }

    fn is_raised(&self) -> bool {
        self.raised.is_cancelled()
    }

    async fn wait(&self) -> Error {
        self.raised.cancelled().await;
        self.slot.get().cloned().unwrap_or(Error::ChannelClosed)
    }

    /// Run `operation` unless an inner error is raised first.
    async fn guard<R>(&self, operation: impl Future<Output = Result<R>>) -> Result<R> {
        tokio::select! {
            biased;
            error = self.wait() => {
                tracing::debug!(%error, "inner failed, cancelling siblings");
                Err(error)
            }
            result = operation => result,
        }
    }
}

/// Inner subscriptions of one fan-in subscription.
///
/// Dropping it cancels every inner still registered.
struct FanIn<T> {
    tx: mpsc::Sender<FanInEvent<T>>,
    rx: mpsc::Receiver<FanInEvent<T>>,
    arena: SubscriptionArena,
    failure: FirstError,
    prefetch: u64,
}

impl<T: Send + 'static> FanIn<T> {
    fn new(config: &FlowConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.inner_buffer.max(1));
        Self {
            tx,
            rx,
            arena: SubscriptionArena::new(),
            failure: FirstError::default(),
            prefetch: config.prefetch.max(1),
        }
    }

    fn active(&self) -> usize {
        self.arena.len()
    }

    /// Subscribe to `publisher` and forward its values into the shared channel.
    fn attach<Q>(&mut self, publisher: Arc<Q>)
    where
        Q: Publisher<Item = T>,
    {
        let mut upstream = Upstream::subscribe(publisher, self.prefetch);
        let handle = self.arena.insert(upstream.subscription().clone());
        let tx = self.tx.clone();
        let failure = self.failure.clone();
        let task = tokio::spawn(async move {
            loop {
                let event = match upstream.next().await {
                    Ok(Some(item)) => FanInEvent::Next(item),
                    Ok(None) => FanInEvent::Done(handle),
                    Err(error) => {
                        failure.raise(error);
                        return;
                    }
                };
                let last = matches!(event, FanInEvent::Done(_));
                if tx.send(event).await.is_err() || last {
                    return;
                }
            }
        });
        self.arena.attach_task(handle, task.abort_handle());
    }

    async fn recv(&mut self) -> Result<FanInEvent<T>> {
        self.rx.recv().await.ok_or(Error::ChannelClosed)
    }

    /// Book-keep an event; yields the value to forward, if any.
    fn settle(&mut self, event: FanInEvent<T>) -> Option<T> {
        match event {
            FanInEvent::Next(item) => Some(item),
            FanInEvent::Done(handle) => {
                self.arena.remove(handle);
                None
            }
        }
    }
}

/// Interleaves several publishers in arrival order.
pub struct Merge<P> {
    sources: Vec<Arc<P>>,
    config: FlowConfig,
}

impl<P> Merge<P> {
    /// Create a new merge over `sources`
    pub fn new(sources: impl IntoIterator<Item = P>) -> Self {
        Self {
            sources: sources.into_iter().map(Arc::new).collect(),
            config: FlowConfig::default(),
        }
    }

    /// Replace the concurrency and buffering settings
    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }
}

/// Merge publishers of the same type; call `boxed()` to mix types
pub fn merge<P>(sources: impl IntoIterator<Item = P>) -> Merge<P>
where
    P: Publisher,
{
    Merge::new(sources)
}

/// `merge` with explicit concurrency and buffering settings
pub fn merge_with_config<P>(sources: impl IntoIterator<Item = P>, config: FlowConfig) -> Merge<P>
where
    P: Publisher,
{
    Merge::new(sources).with_config(config)
}

#[async_trait]
impl<P: Publisher> Publisher for Merge<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let limit = self.config.max_concurrency.unwrap_or(usize::MAX).max(1);
        let mut pending = self.sources.iter();
        let mut fan_in = FanIn::new(&self.config);
        let failure = fan_in.failure.clone();
        loop {
            while fan_in.active() < limit {
                match pending.next() {
                    Some(source) => fan_in.attach(Arc::clone(source)),
                    None => break,
                }
            }
            if fan_in.active() == 0 {
                return Ok(());
            }
            let event = failure.guard(fan_in.recv()).await?;
            if let Some(item) = fan_in.settle(event) {
                failure.guard(emitter.emit(item)).await?;
            }
        }
    }
}

/// Maps every upstream value to an inner publisher and merges the inners.
pub struct FlatMap<P, F> {
    upstream: Arc<P>,
    f: F,
    config: FlowConfig,
}

impl<P, F> FlatMap<P, F> {
    /// Create a new flat-map operator
    pub fn new(upstream: P, f: F, config: FlowConfig) -> Self {
        Self {
            upstream: Arc::new(upstream),
            f,
            config,
        }
    }
}

enum FlatMapStep<T, U> {
    Outer(Result<Option<T>>),
    Inner(Result<FanInEvent<U>>),
}

#[async_trait]
impl<P, F, Q> Publisher for FlatMap<P, F>
where
    P: Publisher,
    F: Fn(P::Item) -> Q + Send + Sync + 'static,
    Q: Publisher,
{
    type Item = Q::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let limit = self.config.max_concurrency.unwrap_or(usize::MAX).max(1);
        let mut outer = Some(Upstream::subscribe(
            Arc::clone(&self.upstream),
            self.config.prefetch.max(1),
        ));
        let mut fan_in = FanIn::new(&self.config);
        let failure = fan_in.failure.clone();

        loop {
            let pull_outer = outer.is_some() && fan_in.active() < limit;
            if outer.is_none() && fan_in.active() == 0 {
                return Ok(());
            }

            if failure.is_raised() {
                return Err(failure.wait().await);
            }

            let step = tokio::select! {
                error = failure.wait() => {
                    tracing::debug!(%error, "inner failed, cancelling siblings");
                    return Err(error);
                }
                next = async {
                    match outer.as_mut() {
                        Some(upstream) => upstream.next().await,
                        None => Ok(None),
                    }
                }, if pull_outer => FlatMapStep::Outer(next),
                event = fan_in.recv(), if fan_in.active() > 0 => FlatMapStep::Inner(event),
            };

            match step {
                FlatMapStep::Outer(Ok(Some(item))) => {
                    fan_in.attach(Arc::new((self.f)(item)));
                }
                FlatMapStep::Outer(Ok(None)) => outer = None,
                FlatMapStep::Outer(Err(error)) => {
                    fan_in.arena.cancel_all();
                    return Err(error);
                }
                FlatMapStep::Inner(event) => {
                    if let Some(item) = fan_in.settle(event?) {
                        failure.guard(emitter.emit(item)).await?;
                    }
                }
            }
        }
    }
}

/// Pairs the values of two publishers by position.
///
/// Completes as soon as either side completes with no value waiting for a
/// partner; the other side is cancelled and its leftovers are discarded.
pub struct Zip<A, B> {
    left: Arc<A>,
    right: Arc<B>,
}

impl<A, B> Zip<A, B> {
    /// Create a new zip of two publishers
    pub fn new(left: A, right: B) -> Self {
        Self {
            left: Arc::new(left),
            right: Arc::new(right),
        }
    }
}

/// Pair values of `left` and `right` into tuples
pub fn zip<A, B>(left: A, right: B) -> Zip<A, B>
where
    A: Publisher,
    B: Publisher,
{
    Zip::new(left, right)
}

/// Pair values of `left` and `right` through a combiner
pub fn zip_with<A, B, F, U>(left: A, right: B, combine: F) -> impl Publisher<Item = U>
where
    A: Publisher,
    B: Publisher,
    F: Fn(A::Item, B::Item) -> U + Send + Sync + 'static,
    U: Send + 'static,
{
    Zip::new(left, right).map(move |(a, b)| combine(a, b))
}

#[async_trait]
impl<A, B> Publisher for Zip<A, B>
where
    A: Publisher,
    B: Publisher,
{
    type Item = (A::Item, B::Item);

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut left = Upstream::subscribe(Arc::clone(&self.left), DEFAULT_PREFETCH);
        let mut right = Upstream::subscribe(Arc::clone(&self.right), DEFAULT_PREFETCH);
        let mut left_slot = None;
        let mut right_slot = None;
        loop {
            tokio::select! {
                next = left.next(), if left_slot.is_none() => match next? {
                    Some(item) => left_slot = Some(item),
                    None => return Ok(()),
                },
                next = right.next(), if right_slot.is_none() => match next? {
                    Some(item) => right_slot = Some(item),
                    None => return Ok(()),
                },
            }
            if left_slot.is_some() && right_slot.is_some() {
                if let (Some(a), Some(b)) = (left_slot.take(), right_slot.take()) {
                    emitter.emit((a, b)).await?;
                }
            }
        }
    }
}

/// Pairs the values of any number of publishers by position into vectors.
pub struct ZipAll<P> {
    sources: Vec<Arc<P>>,
}

impl<P> ZipAll<P> {
    /// Create a new zip over `sources`
    pub fn new(sources: impl IntoIterator<Item = P>) -> Self {
        Self {
            sources: sources.into_iter().map(Arc::new).collect(),
        }
    }
}

/// Zip publishers of the same type into rows
pub fn zip_all<P>(sources: impl IntoIterator<Item = P>) -> ZipAll<P>
where
    P: Publisher,
{
    ZipAll::new(sources)
}

#[async_trait]
impl<P: Publisher> Publisher for ZipAll<P> {
    type Item = Vec<P::Item>;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        if self.sources.is_empty() {
            return Ok(());
        }
        let mut upstreams: Vec<_> = self
            .sources
            .iter()
            .map(|source| Upstream::subscribe(Arc::clone(source), DEFAULT_PREFETCH))
            .collect();

        loop {
            let mut row = Vec::with_capacity(upstreams.len());
            row.resize_with(upstreams.len(), || None);
            {
                let mut pending: FuturesUnordered<_> = upstreams
                    .iter_mut()
                    .enumerate()
                    .map(|(index, upstream)| async move { (index, upstream.next().await) })
                    .collect();
                while let Some((index, next)) = pending.next().await {
                    match next? {
                        Some(item) => row[index] = Some(item),
                        None => return Ok(()),
                    }
                }
            }
            let row: Option<Vec<_>> = row.into_iter().collect();
            match row {
                Some(values) => emitter.emit(values).await?,
                None => return Err(Error::protocol("zip row resolved with a missing value")),
            }
        }
    }
}

/// Relays whichever publisher signals first and cancels the rest.
///
/// Any first signal wins the race, including a completion or an error.
pub struct First<P> {
    sources: Vec<Arc<P>>,
}

impl<P> First<P> {
    /// Create a new race between `sources`
    pub fn new(sources: impl IntoIterator<Item = P>) -> Self {
        Self {
            sources: sources.into_iter().map(Arc::new).collect(),
        }
    }
}

/// Race publishers of the same type; call `boxed()` to mix types
pub fn first<P>(sources: impl IntoIterator<Item = P>) -> First<P>
where
    P: Publisher,
{
    First::new(sources)
}

#[async_trait]
impl<P: Publisher> Publisher for First<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstreams: Vec<_> = self
            .sources
            .iter()
            .map(|source| Upstream::subscribe(Arc::clone(source), DEFAULT_PREFETCH))
            .collect();

        let (winner, signal) = {
            let mut racing: FuturesUnordered<_> = upstreams
                .iter_mut()
                .enumerate()
                .map(|(index, upstream)| async move { (index, upstream.next_signal().await) })
                .collect();
            match racing.next().await {
                Some(result) => result,
                None => return Ok(()),
            }
        };

        let mut upstream = upstreams.swap_remove(winner);
        tracing::debug!(winner, losers = upstreams.len(), "first source signalled");
        drop(upstreams);

        match signal {
            Some(Signal::Next(item)) => emitter.emit(item).await?,
            Some(Signal::Complete) => return Ok(()),
            Some(Signal::Error(error)) => return Err(error),
            None => return Err(Error::ChannelClosed),
        }
        while let Some(item) = upstream.next().await? {
            emitter.emit(item).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::clock::Clock;
    use crate::sources::{just, range, ErrorSource, IterSource, NeverSource};
    use crate::verifier::StepVerifier;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Counts up forever after `delay`; `stopped` flips once its producing
    /// task is gone.
    struct Endless {
        delay: Duration,
        clock: Clock,
        stopped: Arc<AtomicBool>,
    }

    impl Endless {
        fn new(delay: Duration, clock: &Clock) -> (Self, Arc<AtomicBool>) {
            let stopped = Arc::new(AtomicBool::new(false));
            let endless = Self {
                delay,
                clock: clock.clone(),
                stopped: Arc::clone(&stopped),
            };
            (endless, stopped)
        }
    }

    #[async_trait]
    impl Publisher for Endless {
        type Item = u64;

        async fn produce(&self, emitter: &mut Emitter<u64>) -> Result<()> {
            let _guard = SetOnDrop(Arc::clone(&self.stopped));
            self.clock.sleep(self.delay).await;
            let mut n = 0;
            loop {
                emitter.emit(n).await?;
                n += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_merge_interleaves_by_arrival() {
        let clock = Clock::virtual_time();
        let characters = just(vec!["Garfield", "Kojak", "Barbossa"])
            .delay_elements(Duration::from_millis(500), &clock)
            .boxed();
        let foods = just(vec!["Lasagna", "Lollipops", "Apples"])
            .delay_elements(Duration::from_millis(500), &clock)
            .delay_subscription(Duration::from_millis(250), &clock)
            .boxed();

        StepVerifier::create(merge(vec![characters, foods]))
            .with_virtual_time(&clock)
            .expect_next_sequence([
                "Garfield", "Lasagna", "Kojak", "Lollipops", "Barbossa", "Apples",
            ])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_merge_first_error_cancels_siblings() {
        let sources = vec![
            NeverSource::<i32>::new().boxed(),
            ErrorSource::new(Error::custom("broken")).boxed(),
        ];
        StepVerifier::create(merge(sources))
            .expect_error_matches(|e| e.to_string() == "broken")
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_merge_error_overtakes_pending_demand() {
        let clock = Clock::virtual_time();
        let (endless, stopped) = Endless::new(Duration::ZERO, &clock);
        let failing = ErrorSource::new(Error::custom("late failure"))
            .delay_subscription(Duration::from_secs(1), &clock)
            .boxed();

        StepVerifier::with_initial_request(merge(vec![endless.boxed(), failing]), 1)
            .with_virtual_time(&clock)
            .expect_next(0)
            .then_await(Duration::from_secs(2))
            .expect_error_matches(|e| e.to_string() == "late failure")
            .verify()
            .await
            .unwrap();

        clock.sleep(Duration::from_millis(10)).await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_merge_with_concurrency_one_is_concat() {
        let merged = merge_with_config(
            vec![range(1, 3), range(10, 3)],
            FlowConfig::new().max_concurrency(1),
        );
        StepVerifier::create(merged)
            .expect_next_sequence([1, 2, 3, 10, 11, 12])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_flat_map_completes_after_all_inners() {
        let expanded = range(1, 3).flat_map(|n| IterSource::new(vec![n; n as usize]));
        let mut values = expanded.collect_list().resolve().await.unwrap().unwrap();
        values.sort();
        assert_eq!(values, vec![1, 2, 2, 3, 3, 3]);
    }

    #[tokio::test]
    async fn test_flat_map_bounded_concurrency_keeps_order() {
        let config = FlowConfig::new().max_concurrency(1);
        StepVerifier::create(range(1, 3).flat_map_with(|n| range(n * 10, 2), config))
            .expect_next_sequence([10, 11, 20, 21, 30, 31])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_flat_map_inner_error_cancels_siblings() {
        let clock = Clock::virtual_time();
        let (endless, stopped) = Endless::new(Duration::ZERO, &clock);
        let endless = endless.boxed();
        let inner_clock = clock.clone();
        let expanded = range(0, 2).flat_map(move |n| {
            if n == 0 {
                endless.clone()
            } else {
                ErrorSource::new(Error::custom("inner failure"))
                    .delay_subscription(Duration::from_secs(1), &inner_clock)
                    .boxed()
            }
        });

        StepVerifier::with_initial_request(expanded, 1)
            .with_virtual_time(&clock)
            .expect_next(0)
            .then_await(Duration::from_secs(2))
            .expect_error_matches(|e| e.to_string() == "inner failure")
            .verify()
            .await
            .unwrap();

        clock.sleep(Duration::from_millis(10)).await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_zero_prefetch_field_still_requests() {
        let config = FlowConfig {
            prefetch: 0,
            ..FlowConfig::default()
        };
        let values = range(1, 3)
            .flat_map_with(|n| just(vec![n]), config.clone())
            .collect_list()
            .resolve()
            .await
            .unwrap();
        assert_eq!(values.map(|v| v.len()), Some(3));

        let merged = merge_with_config(vec![range(1, 2), range(5, 2)], config)
            .count()
            .resolve()
            .await
            .unwrap();
        assert_eq!(merged, Some(4));
    }

    #[tokio::test]
    async fn test_zip_with_combiner() {
        let eaters = zip_with(
            just(vec!["Garfield", "Kojak", "Barbossa"]),
            just(vec!["Lasagna", "Lollipops", "Apples"]),
            |c, f| format!("{c} eats {f}"),
        );
        StepVerifier::create(eaters)
            .expect_next_sequence([
                "Garfield eats Lasagna".to_string(),
                "Kojak eats Lollipops".to_string(),
                "Barbossa eats Apples".to_string(),
            ])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_zip_stops_at_shorter_side() {
        StepVerifier::create(zip(range(1, 5), just(vec!["a", "b"])))
            .expect_next_sequence([(1, "a"), (2, "b")])
            .expect_complete()
            .verify()
            .await
            .unwrap();

        StepVerifier::create(zip(NeverSource::<u8>::new(), IterSource::new(Vec::<u8>::new())))
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_zip_all_builds_rows() {
        StepVerifier::create(zip_all(vec![range(0, 3), range(10, 2), range(20, 4)]))
            .expect_next(vec![0, 10, 20])
            .expect_next(vec![1, 11, 21])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_relays_fastest_source() {
        let clock = Clock::virtual_time();
        let slow = just(vec!["tortoise", "snail", "sloth"])
            .delay_subscription(Duration::from_millis(100), &clock)
            .boxed();
        let fast = just(vec!["hare", "cheetah", "squirrel"]).boxed();

        StepVerifier::create(first(vec![slow, fast]))
            .with_virtual_time(&clock)
            .expect_next_sequence(["hare", "cheetah", "squirrel"])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_cancels_the_losing_source() {
        let clock = Clock::virtual_time();
        let (slow, slow_stopped) = Endless::new(Duration::from_millis(100), &clock);
        let fast = IterSource::new(vec![7u64, 8, 9]).boxed();

        StepVerifier::create(first(vec![slow.boxed(), fast]))
            .with_virtual_time(&clock)
            .expect_next_sequence([7, 8, 9])
            .expect_complete()
            .verify()
            .await
            .unwrap();

        clock.sleep(Duration::from_millis(10)).await;
        assert!(slow_stopped.load(Ordering::SeqCst));
    }
}
