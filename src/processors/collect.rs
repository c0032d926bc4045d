//! Operators that reduce a sequence to a single value.
//!
//! Each of these emits exactly one value, except [`NextValue`] on an empty
//! sequence. They are exposed through `PublisherExt` wrapped in a `Mono`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DEFAULT_PREFETCH;
use crate::core::error::Result;
use crate::core::subscription::{Emitter, Upstream};
use crate::core::traits::Publisher;

/// Accumulates every value into a list.
pub struct CollectList<P> {
    upstream: Arc<P>,
}

impl<P> CollectList<P> {
    /// Create a new list collector
    pub fn new(upstream: P) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for CollectList<P> {
    type Item = Vec<P::Item>;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        let mut items = Vec::new();
        while let Some(item) = upstream.next().await? {
            items.push(item);
        }
        emitter.emit(items).await
    }
}

/// Accumulates every value into a map under a derived key.
///
/// A later value replaces an earlier one with the same key.
pub struct CollectMap<P, F> {
    upstream: Arc<P>,
    key_fn: F,
}

impl<P, F> CollectMap<P, F> {
    /// Create a new map collector
    pub fn new(upstream: P, key_fn: F) -> Self {
        Self {
            upstream: Arc::new(upstream),
            key_fn,
        }
    }
}

#[async_trait]
impl<P, F, K> Publisher for CollectMap<P, F>
where
    P: Publisher,
    F: Fn(&P::Item) -> K + Send + Sync + 'static,
    K: Eq + Hash + Send + 'static,
{
    type Item = HashMap<K, P::Item>;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        let mut map = HashMap::new();
        while let Some(item) = upstream.next().await? {
            map.insert((self.key_fn)(&item), item);
        }
        emitter.emit(map).await
    }
}

/// Emits `true` if every value satisfies the predicate, stopping at the
/// first one that does not.
pub struct All<P, F> {
    upstream: Arc<P>,
    predicate: F,
}

impl<P, F> All<P, F> {
    /// Create a new all-match operator
    pub fn new(upstream: P, predicate: F) -> Self {
        Self {
            upstream: Arc::new(upstream),
            predicate,
        }
    }
}

#[async_trait]
impl<P, F> Publisher for All<P, F>
where
    P: Publisher,
    F: Fn(&P::Item) -> bool + Send + Sync + 'static,
{
    type Item = bool;

    async fn produce(&self, emitter: &mut Emitter<bool>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        while let Some(item) = upstream.next().await? {
            if !(self.predicate)(&item) {
                upstream.cancel();
                return emitter.emit(false).await;
            }
        }
        emitter.emit(true).await
    }
}

/// Emits `true` as soon as a value satisfies the predicate.
pub struct Any<P, F> {
    upstream: Arc<P>,
    predicate: F,
}

impl<P, F> Any<P, F> {
    /// Create a new any-match operator
    pub fn new(upstream: P, predicate: F) -> Self {
        Self {
            upstream: Arc::new(upstream),
            predicate,
        }
    }
}

#[async_trait]
impl<P, F> Publisher for Any<P, F>
where
    P: Publisher,
    F: Fn(&P::Item) -> bool + Send + Sync + 'static,
{
    type Item = bool;

    async fn produce(&self, emitter: &mut Emitter<bool>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        while let Some(item) = upstream.next().await? {
            if (self.predicate)(&item) {
                upstream.cancel();
                return emitter.emit(true).await;
            }
        }
        emitter.emit(false).await
    }
}

/// Emits the number of values in the sequence.
pub struct Count<P> {
    upstream: Arc<P>,
}

impl<P> Count<P> {
    /// Create a new counting operator
    pub fn new(upstream: P) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for Count<P> {
    type Item = u64;

    async fn produce(&self, emitter: &mut Emitter<u64>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        let mut count = 0u64;
        while upstream.next().await?.is_some() {
            count += 1;
        }
        emitter.emit(count).await
    }
}

/// Emits the first value and cancels upstream; completes empty on an empty
/// sequence.
pub struct NextValue<P> {
    upstream: Arc<P>,
}

impl<P> NextValue<P> {
    /// Create a new first-value operator
    pub fn new(upstream: P) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for NextValue<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstream = Upstream::bounded(Arc::clone(&self.upstream), 1, 1);
        if let Some(item) = upstream.next().await? {
            upstream.cancel();
            emitter.emit(item).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::error::Error;
    use crate::core::traits::PublisherExt;
    use crate::sources::{just, range, EmptySource, ErrorSource, IterSource};
    use crate::verifier::StepVerifier;

    #[derive(Debug, Clone, PartialEq)]
    struct Pet {
        name: &'static str,
        kind: &'static str,
    }

    #[tokio::test]
    async fn test_collect_list_and_count() {
        let list = range(1, 4).collect_list().resolve().await.unwrap();
        assert_eq!(list, Some(vec![1, 2, 3, 4]));

        let count = range(1, 4).count().resolve().await.unwrap();
        assert_eq!(count, Some(4));
    }

    #[tokio::test]
    async fn test_collect_list_drops_partial_list_on_error() {
        let failing = || {
            range(1, 3).try_map(|n| {
                if n == 3 {
                    Err(Error::custom("boom"))
                } else {
                    Ok(n)
                }
            })
        };

        StepVerifier::create(failing().collect_list())
            .expect_error_matches(|e| e.to_string() == "boom")
            .verify()
            .await
            .unwrap();

        let resolved = failing().collect_list().resolve().await;
        assert_eq!(resolved.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_collect_map_last_value_wins() {
        let pets = just(vec![
            Pet { name: "Garfield", kind: "cat" },
            Pet { name: "Odie", kind: "dog" },
            Pet { name: "Nermal", kind: "cat" },
        ]);
        let by_kind = pets
            .collect_map(|pet| pet.kind)
            .resolve()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_kind.len(), 2);
        assert_eq!(by_kind["cat"].name, "Nermal");
        assert_eq!(by_kind["dog"].name, "Odie");
    }

    #[tokio::test]
    async fn test_all_and_any() {
        let animals = just(vec!["aardvark", "elephant", "koala", "eagle", "kangaroo"]);
        let all_have_a = animals.clone().all(|a| a.contains('a'));
        let any_have_z = animals.any(|a| a.contains('z'));
        assert_eq!(all_have_a.resolve().await.unwrap(), Some(true));
        assert_eq!(any_have_z.resolve().await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_all_short_circuits_on_endless_source() {
        let result = IterSource::new(0u64..).all(|n| *n < 10).resolve().await;
        assert_eq!(result.unwrap(), Some(false));

        let result = IterSource::new(0u64..).any(|n| *n == 10).resolve().await;
        assert_eq!(result.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_empty_sequences() {
        assert_eq!(
            EmptySource::<u8>::new().all(|_| false).resolve().await.unwrap(),
            Some(true)
        );
        assert_eq!(
            EmptySource::<u8>::new().next().resolve().await.unwrap(),
            None
        );
        let failed = ErrorSource::<u8>::new(Error::custom("down")).count().resolve().await;
        assert!(failed.is_err());
    }
}
