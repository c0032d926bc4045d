//! Core traits for the publisher/subscriber system.
//!
//! This module defines the fundamental abstractions of the reactive runtime:
//! a [`Publisher`] describes how to produce a sequence for one subscription,
//! a [`Subscriber`] receives the signals of one subscription, and
//! [`PublisherExt`] chains operators onto any publisher.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::config::FlowConfig;
use crate::core::error::{Error, Result};
use crate::core::subscription::{Emitter, Subscription, UNBOUNDED};
use crate::mono::Mono;
use crate::processors::collect::{All, Any, CollectList, CollectMap, Count, NextValue};
use crate::processors::combinators::FlatMap;
use crate::processors::share::Share;
use crate::processors::time::{DelayElements, DelaySubscription, SkipFor, TakeFor};
use crate::processors::{Buffer, Distinct, Filter, Log, Map, Skip, Take, TryMap};
use crate::scheduler::{Scheduler, SubscribeOn};
use crate::sinks::{FnSubscriber, SignalStream};

/// A publisher is a reusable blueprint for a sequence of values.
///
/// Each subscription runs `produce` once, in its own task, with a fresh
/// [`Emitter`]. Local state of `produce` is therefore scoped to that one
/// subscription, and re-subscribing replays the sequence from the start.
///
/// Returning `Ok(())` completes the subscription, returning an error sends
/// an error signal. `Emitter::emit` waits for downstream demand, so a
/// publisher never produces more than was requested.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use fluxweld::prelude::*;
///
/// struct Countdown(u32);
///
/// #[async_trait]
/// impl Publisher for Countdown {
///     type Item = u32;
///
///     async fn produce(&self, emitter: &mut Emitter<u32>) -> Result<()> {
///         for n in (1..=self.0).rev() {
///             emitter.emit(n).await?;
///         }
///         Ok(())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<()> {
/// StepVerifier::create(Countdown(3))
///     .expect_next_sequence([3, 2, 1])
///     .expect_complete()
///     .verify()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// The type of values this publisher emits
    type Item: Send + 'static;

    /// Produce the sequence for one subscription.
    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()>;
}

/// A subscriber receives the signals of one subscription, in order.
///
/// Calls never overlap: `on_next` for value n+1 starts only after the call
/// for value n has returned. Calling `request` or `cancel` on the
/// subscription from inside a callback is allowed.
#[async_trait]
pub trait Subscriber: Send + 'static {
    /// The type of values this subscriber accepts
    type Item: Send + 'static;

    /// Called once before any other signal. The default requests everything.
    async fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(UNBOUNDED);
    }

    /// Called for every value.
    async fn on_next(&mut self, item: Self::Item);

    /// Called at most once, when the sequence fails.
    async fn on_error(&mut self, error: Error) {
        tracing::warn!(%error, "error signal reached a subscriber without an error handler");
    }

    /// Called at most once, when the sequence completes.
    async fn on_complete(&mut self) {}
}

/// A type-erased, cheaply cloneable publisher.
pub struct BoxPublisher<T> {
    inner: Arc<dyn Publisher<Item = T>>,
}

impl<T: Send + 'static> BoxPublisher<T> {
    /// Erase the type of `publisher`
    pub fn new<P>(publisher: P) -> Self
    where
        P: Publisher<Item = T>,
    {
        Self {
            inner: Arc::new(publisher),
        }
    }
}

impl<T> Clone for BoxPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Publisher for BoxPublisher<T> {
    type Item = T;

    async fn produce(&self, emitter: &mut Emitter<T>) -> Result<()> {
        self.inner.produce(emitter).await
    }
}

/// Extension trait for publishers that provides operator methods
pub trait PublisherExt: Publisher {
    /// Transform every value
    fn map<F, U>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Item) -> U + Send + Sync + 'static,
        U: Send + 'static,
    {
        Map::new(self, f)
    }

    /// Transform every value with a fallible callback; the first `Err`
    /// becomes the error signal and cancels upstream.
    fn try_map<F, U>(self, f: F) -> TryMap<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Item) -> Result<U> + Send + Sync + 'static,
        U: Send + 'static,
    {
        TryMap::new(self, f)
    }

    /// Keep only values matching the predicate
    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        Self: Sized,
        F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
    {
        Filter::new(self, predicate)
    }

    /// Map every value to a publisher and merge the results
    fn flat_map<F, Q>(self, f: F) -> FlatMap<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Item) -> Q + Send + Sync + 'static,
        Q: Publisher,
    {
        FlatMap::new(self, f, FlowConfig::default())
    }

    /// `flat_map` with explicit concurrency and buffering settings
    fn flat_map_with<F, Q>(self, f: F, config: FlowConfig) -> FlatMap<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Item) -> Q + Send + Sync + 'static,
        Q: Publisher,
    {
        FlatMap::new(self, f, config)
    }

    /// Group consecutive values into lists of `size`
    fn buffer(self, size: usize) -> Buffer<Self>
    where
        Self: Sized,
    {
        Buffer::new(self, Some(size))
    }

    /// Group the whole sequence into a single list
    fn buffer_all(self) -> Buffer<Self>
    where
        Self: Sized,
    {
        Buffer::new(self, None)
    }

    /// Drop values that were already seen
    fn distinct(self) -> Distinct<Self>
    where
        Self: Sized,
        Self::Item: Eq + Hash + Clone,
    {
        Distinct::new(self)
    }

    /// Drop the first `count` values
    fn skip(self, count: usize) -> Skip<Self>
    where
        Self: Sized,
    {
        Skip::new(self, count)
    }

    /// Drop values until `duration` has elapsed since subscription
    fn skip_for(self, duration: Duration, clock: &Clock) -> SkipFor<Self>
    where
        Self: Sized,
    {
        SkipFor::new(self, duration, clock.clone())
    }

    /// Emit at most `count` values, then complete
    fn take(self, count: usize) -> Take<Self>
    where
        Self: Sized,
    {
        Take::new(self, count)
    }

    /// Emit values until `duration` has elapsed since subscription
    fn take_for(self, duration: Duration, clock: &Clock) -> TakeFor<Self>
    where
        Self: Sized,
    {
        TakeFor::new(self, duration, clock.clone())
    }

    /// Shift every value `duration` later
    fn delay_elements(self, duration: Duration, clock: &Clock) -> DelayElements<Self>
    where
        Self: Sized,
    {
        DelayElements::new(self, duration, clock.clone())
    }

    /// Subscribe to this publisher only after `duration`
    fn delay_subscription(self, duration: Duration, clock: &Clock) -> DelaySubscription<Self>
    where
        Self: Sized,
    {
        DelaySubscription::new(self, duration, clock.clone())
    }

    /// Run the subscription and production of this publisher on a lane of
    /// `scheduler`
    fn subscribe_on(self, scheduler: &Scheduler) -> SubscribeOn<Self>
    where
        Self: Sized,
    {
        SubscribeOn::new(self, scheduler.clone())
    }

    /// Multicast one upstream subscription to every current subscriber;
    /// late subscribers miss what was emitted before they joined
    fn share(self) -> Share<Self>
    where
        Self: Sized,
        Self::Item: Clone,
    {
        Share::new(self)
    }

    /// Trace every signal under `category`
    fn log(self, category: impl Into<String>) -> Log<Self>
    where
        Self: Sized,
        Self::Item: std::fmt::Debug,
    {
        Log::new(self, category.into())
    }

    /// Accumulate the sequence into one list
    fn collect_list(self) -> Mono<Vec<Self::Item>>
    where
        Self: Sized,
    {
        Mono::from_single(CollectList::new(self))
    }

    /// Accumulate the sequence into a map; the last value for a key wins
    fn collect_map<K, F>(self, key_fn: F) -> Mono<HashMap<K, Self::Item>>
    where
        Self: Sized,
        K: Eq + Hash + Send + 'static,
        F: Fn(&Self::Item) -> K + Send + Sync + 'static,
    {
        Mono::from_single(CollectMap::new(self, key_fn))
    }

    /// True if every value matches; stops at the first mismatch
    fn all<F>(self, predicate: F) -> Mono<bool>
    where
        Self: Sized,
        F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
    {
        Mono::from_single(All::new(self, predicate))
    }

    /// True if some value matches; stops at the first match
    fn any<F>(self, predicate: F) -> Mono<bool>
    where
        Self: Sized,
        F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
    {
        Mono::from_single(Any::new(self, predicate))
    }

    /// Count the values of the sequence
    fn count(self) -> Mono<u64>
    where
        Self: Sized,
    {
        Mono::from_single(Count::new(self))
    }

    /// The first value, then cancel upstream
    fn next(self) -> Mono<Self::Item>
    where
        Self: Sized,
    {
        Mono::from_single(NextValue::new(self))
    }

    /// Erase the publisher type
    fn boxed(self) -> BoxPublisher<Self::Item>
    where
        Self: Sized,
    {
        BoxPublisher::new(self)
    }

    /// Subscribe with a [`Subscriber`] on the current runtime
    fn subscribe<S>(self, subscriber: S) -> Subscription
    where
        Self: Sized,
        S: Subscriber<Item = Self::Item>,
    {
        crate::sinks::subscribe(Arc::new(self), subscriber)
    }

    /// Subscribe with a callback for values, requesting everything
    fn subscribe_fn<F>(self, on_next: F) -> Subscription
    where
        Self: Sized,
        F: FnMut(Self::Item) + Send + 'static,
    {
        self.subscribe(FnSubscriber::new(on_next))
    }

    /// Consume the publisher as a `Stream` of results, one value of demand
    /// at a time
    fn into_stream(self) -> SignalStream<Self::Item>
    where
        Self: Sized,
    {
        SignalStream::new(Arc::new(self))
    }
}

impl<P: Publisher> PublisherExt for P {}
