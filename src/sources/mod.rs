//! Source implementations for the fluxweld library.
//!
//! Sources sit at the start of a chain. All of them are cold except
//! [`StreamSource`], which wraps a one-shot stream, and the time-driven
//! [`IntervalSource`], whose ticks are not replayed.

use std::marker::PhantomData;
use std::ops::Range;

use async_trait::async_trait;
use futures_core::Stream;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

use crate::core::error::{Error, Result};
use crate::core::subscription::Emitter;
use crate::core::traits::Publisher;

pub mod time;

pub use time::{interval, IntervalSource};

/// A publisher that replays a cloneable collection for every subscriber
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    items: I,
}

impl<I> IterSource<I> {
    /// Create a new iterable source
    pub fn new(items: I) -> Self {
        Self { items }
    }
}

#[async_trait]
impl<I> Publisher for IterSource<I>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send,
    I::Item: Send + 'static,
{
    type Item = I::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        for item in self.items.clone() {
            emitter.emit(item).await?;
        }
        Ok(())
    }
}

/// Emit the given values in order, then complete
pub fn just<T>(items: Vec<T>) -> IterSource<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    IterSource::new(items)
}

/// Emit `count` consecutive integers starting at `start`
pub fn range(start: i64, count: u64) -> IterSource<Range<i64>> {
    let end = start.saturating_add(i64::try_from(count).unwrap_or(i64::MAX));
    IterSource::new(start..end)
}

/// A publisher that completes without emitting
pub struct EmptySource<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> EmptySource<T> {
    /// Create a new empty source
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for EmptySource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Publisher for EmptySource<T> {
    type Item = T;

    async fn produce(&self, _emitter: &mut Emitter<T>) -> Result<()> {
        Ok(())
    }
}

/// A publisher that fails every subscriber with the same error
pub struct ErrorSource<T> {
    error: Error,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ErrorSource<T> {
    /// Create a new failing source
    pub fn new(error: Error) -> Self {
        Self {
            error,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Publisher for ErrorSource<T> {
    type Item = T;

    async fn produce(&self, _emitter: &mut Emitter<T>) -> Result<()> {
        Err(self.error.clone())
    }
}

/// A publisher that never signals anything
pub struct NeverSource<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> NeverSource<T> {
    /// Create a new silent source
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for NeverSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Publisher for NeverSource<T> {
    type Item = T;

    async fn produce(&self, emitter: &mut Emitter<T>) -> Result<()> {
        emitter.cancelled().await;
        Err(Error::Cancelled)
    }
}

/// A publisher over a one-shot stream.
///
/// The first subscriber drains the stream; every later subscriber receives
/// an error signal.
pub struct StreamSource<S> {
    stream: Mutex<Option<S>>,
}

impl<S> StreamSource<S> {
    /// Create a new stream source
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }
}

#[async_trait]
impl<S> Publisher for StreamSource<S>
where
    S: Stream + Send + Unpin + 'static,
    S::Item: Send + 'static,
{
    type Item = S::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let taken = self.stream.lock().await.take();
        let mut stream = taken.ok_or_else(|| {
            Error::protocol("stream source has already been subscribed to")
        })?;
        while let Some(item) = stream.next().await {
            emitter.emit(item).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::PublisherExt;

    async fn collect<P: Publisher>(publisher: P) -> Result<Vec<P::Item>> {
        Ok(publisher
            .collect_list()
            .resolve()
            .await?
            .unwrap_or_default())
    }

    #[tokio::test]
    async fn test_just_replays_for_every_subscriber() {
        let source = just(vec!["a", "b"]).boxed();
        assert_eq!(collect(source.clone()).await.unwrap(), vec!["a", "b"]);
        assert_eq!(collect(source).await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_range_counts_from_start() {
        assert_eq!(collect(range(5, 3)).await.unwrap(), vec![5, 6, 7]);
        assert!(collect(range(5, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_error_sources() {
        assert!(collect(EmptySource::<u8>::new()).await.unwrap().is_empty());

        let failed = collect(ErrorSource::<u8>::new(Error::custom("boom"))).await;
        assert_eq!(failed.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_stream_source_is_single_use() {
        let source = StreamSource::new(tokio_stream::iter(vec![1, 2, 3])).boxed();
        assert_eq!(collect(source.clone()).await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            collect(source).await,
            Err(Error::Protocol(_))
        ));
    }
}
