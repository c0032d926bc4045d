//! Operator implementations for the fluxweld library.
//!
//! Every operator wraps an upstream publisher and is itself a publisher.
//! Subscribing to an operator subscribes to its upstream through an
//! [`Upstream`] handle that requests demand in prefetch batches; values are
//! only pushed downstream against downstream demand. Per-subscription state
//! (buffers, seen sets, counters) lives in `produce` and is dropped with it.

pub mod collect;
pub mod combinators;
pub mod share;
pub mod time;

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DEFAULT_PREFETCH;
use crate::core::error::{Error, Result};
use crate::core::subscription::{Emitter, Upstream};
use crate::core::traits::Publisher;

/// Applies a function to every value.
pub struct Map<P, F> {
    upstream: Arc<P>,
    f: F,
}

impl<P, F> Map<P, F> {
    /// Create a new map operator
    pub fn new(upstream: P, f: F) -> Self {
        Self {
            upstream: Arc::new(upstream),
            f,
        }
    }
}

#[async_trait]
impl<P, F, U> Publisher for Map<P, F>
where
    P: Publisher,
    F: Fn(P::Item) -> U + Send + Sync + 'static,
    U: Send + 'static,
{
    type Item = U;

    async fn produce(&self, emitter: &mut Emitter<U>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        while let Some(item) = upstream.next().await? {
            emitter.emit((self.f)(item)).await?;
        }
        Ok(())
    }
}

/// Applies a fallible function to every value; the first failure becomes the
/// error signal.
pub struct TryMap<P, F> {
    upstream: Arc<P>,
    f: F,
}

impl<P, F> TryMap<P, F> {
    /// Create a new fallible map operator
    pub fn new(upstream: P, f: F) -> Self {
        Self {
            upstream: Arc::new(upstream),
            f,
        }
    }
}

#[async_trait]
impl<P, F, U> Publisher for TryMap<P, F>
where
    P: Publisher,
    F: Fn(P::Item) -> Result<U> + Send + Sync + 'static,
    U: Send + 'static,
{
    type Item = U;

    async fn produce(&self, emitter: &mut Emitter<U>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        while let Some(item) = upstream.next().await? {
            let mapped = (self.f)(item)?;
            emitter.emit(mapped).await?;
        }
        Ok(())
    }
}

/// Passes only the values that satisfy a predicate.
///
/// Rejected values never consume downstream demand.
pub struct Filter<P, F> {
    upstream: Arc<P>,
    predicate: F,
}

impl<P, F> Filter<P, F> {
    /// Create a new filter operator
    pub fn new(upstream: P, predicate: F) -> Self {
        Self {
            upstream: Arc::new(upstream),
            predicate,
        }
    }
}

#[async_trait]
impl<P, F> Publisher for Filter<P, F>
where
    P: Publisher,
    F: Fn(&P::Item) -> bool + Send + Sync + 'static,
{
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        while let Some(item) = upstream.next().await? {
            if (self.predicate)(&item) {
                emitter.emit(item).await?;
            }
        }
        Ok(())
    }
}

/// Groups consecutive values into lists.
///
/// With a size, emits every full group and the shorter tail on completion.
/// Without one, emits the whole sequence as a single list.
pub struct Buffer<P> {
    upstream: Arc<P>,
    size: Option<usize>,
}

impl<P> Buffer<P> {
    /// Create a new buffer operator; `None` buffers until completion
    pub fn new(upstream: P, size: Option<usize>) -> Self {
        Self {
            upstream: Arc::new(upstream),
            size,
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for Buffer<P> {
    type Item = Vec<P::Item>;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        if self.size == Some(0) {
            return Err(Error::invalid_argument("buffer size must be positive"));
        }
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        // Sizes are caller-controlled; grow past one prefetch batch on demand.
        let capacity = self.size.unwrap_or(0).min(DEFAULT_PREFETCH as usize);
        let mut batch = Vec::with_capacity(capacity);
        while let Some(item) = upstream.next().await? {
            batch.push(item);
            if Some(batch.len()) == self.size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(capacity));
                emitter.emit(full).await?;
            }
        }
        if !batch.is_empty() || self.size.is_none() {
            emitter.emit(batch).await?;
        }
        Ok(())
    }
}

/// Drops values equal to one already emitted on this subscription.
pub struct Distinct<P> {
    upstream: Arc<P>,
}

impl<P> Distinct<P> {
    /// Create a new distinct operator
    pub fn new(upstream: P) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }
}

#[async_trait]
impl<P> Publisher for Distinct<P>
where
    P: Publisher,
    P::Item: Eq + Hash + Clone,
{
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        let mut seen = HashSet::new();
        while let Some(item) = upstream.next().await? {
            if seen.insert(item.clone()) {
                emitter.emit(item).await?;
            }
        }
        Ok(())
    }
}

/// Drops the first `count` values.
pub struct Skip<P> {
    upstream: Arc<P>,
    count: usize,
}

impl<P> Skip<P> {
    /// Create a new skip operator
    pub fn new(upstream: P, count: usize) -> Self {
        Self {
            upstream: Arc::new(upstream),
            count,
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for Skip<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        let mut skipped = 0;
        while let Some(item) = upstream.next().await? {
            if skipped < self.count {
                skipped += 1;
                continue;
            }
            emitter.emit(item).await?;
        }
        Ok(())
    }
}

/// Emits at most `count` values, then cancels upstream and completes.
///
/// Never requests more than `count` values from upstream.
pub struct Take<P> {
    upstream: Arc<P>,
    count: usize,
}

impl<P> Take<P> {
    /// Create a new take operator
    pub fn new(upstream: P, count: usize) -> Self {
        Self {
            upstream: Arc::new(upstream),
            count,
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for Take<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        if self.count == 0 {
            return Ok(());
        }
        let total = self.count as u64;
        let mut upstream = Upstream::bounded(Arc::clone(&self.upstream), DEFAULT_PREFETCH, total);
        let mut taken = 0;
        while let Some(item) = upstream.next().await? {
            emitter.emit(item).await?;
            taken += 1;
            if taken == self.count {
                upstream.cancel();
                break;
            }
        }
        Ok(())
    }
}

/// Traces every signal passing through under a category name.
pub struct Log<P> {
    upstream: Arc<P>,
    category: String,
}

impl<P> Log<P> {
    /// Create a new logging operator
    pub fn new(upstream: P, category: String) -> Self {
        Self {
            upstream: Arc::new(upstream),
            category,
        }
    }
}

#[async_trait]
impl<P> Publisher for Log<P>
where
    P: Publisher,
    P::Item: Debug,
{
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let category = self.category.as_str();
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        tracing::info!(category, subscription = %upstream.subscription().id(), "onSubscribe");
        loop {
            match upstream.next().await {
                Ok(Some(item)) => {
                    tracing::info!(category, "onNext({:?})", item);
                    emitter.emit(item).await?;
                }
                Ok(None) => {
                    tracing::info!(category, "onComplete()");
                    return Ok(());
                }
                Err(error) => {
                    tracing::info!(category, %error, "onError()");
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::PublisherExt;
    use crate::sources::{just, range, ErrorSource, IterSource, NeverSource};
    use crate::verifier::StepVerifier;

    #[tokio::test]
    async fn test_skip_drops_leading_values() {
        let words = just(vec!["one", "two", "skip a few", "ninety nine", "one hundred"]);
        StepVerifier::create(words.skip(3))
            .expect_next_sequence(["ninety nine", "one hundred"])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_map_filter_chain() {
        StepVerifier::create(range(1, 10).filter(|n| n % 2 == 0).map(|n| n * 10))
            .expect_next_sequence([20, 40, 60, 80, 100])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_try_map_failure_becomes_error_signal() {
        let parsed = just(vec!["1", "2", "x", "4"]).try_map(|s| {
            s.parse::<i32>()
                .map_err(|_| Error::custom(format!("not a number: {s}")))
        });
        StepVerifier::create(parsed)
            .expect_next_sequence([1, 2])
            .expect_error_matches(|e| e.to_string() == "not a number: x")
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_panicking_map_becomes_error_signal() {
        let mapped = range(1, 3).map(|n| {
            if n == 2 {
                panic!("cannot map {n}");
            }
            n
        });
        StepVerifier::create(mapped)
            .expect_next(1)
            .expect_error_matches(|e| e.to_string().contains("cannot map 2"))
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_buffer_emits_tail_on_completion() {
        StepVerifier::create(range(1, 7).buffer(3))
            .expect_next(vec![1, 2, 3])
            .expect_next(vec![4, 5, 6])
            .expect_next(vec![7])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_huge_buffer_size_yields_one_tail_group() {
        let groups = range(1, 3)
            .buffer(usize::MAX)
            .collect_list()
            .resolve()
            .await
            .unwrap();
        assert_eq!(groups, Some(vec![vec![1, 2, 3]]));
    }

    #[tokio::test]
    async fn test_buffer_zero_is_invalid() {
        StepVerifier::create(range(1, 3).buffer(0))
            .expect_error_matches(|e| matches!(e, Error::InvalidArgument(_)))
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_buffer_all_of_empty_is_one_empty_list() {
        StepVerifier::create(IterSource::new(Vec::<u8>::new()).buffer_all())
            .expect_next(Vec::new())
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_distinct_keeps_first_occurrence() {
        StepVerifier::create(just(vec![3, 1, 3, 2, 1, 4]).distinct())
            .expect_next_sequence([3, 1, 2, 4])
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_take_stops_an_endless_source() {
        StepVerifier::create(IterSource::new(0u64..).take(4))
            .expect_next_sequence([0, 1, 2, 3])
            .expect_complete()
            .verify()
            .await
            .unwrap();

        StepVerifier::create(NeverSource::<u8>::new().take(0))
            .expect_complete()
            .verify()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_log_passes_errors_through() {
        StepVerifier::create(ErrorSource::<u8>::new(Error::custom("boom")).log("test"))
            .expect_error_matches(|e| e.to_string() == "boom")
            .verify()
            .await
            .unwrap();
    }
}
