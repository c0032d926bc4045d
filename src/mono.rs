//! Single-value publishers.
//!
//! A [`Mono`] emits at most one value before its terminal signal. It is the
//! result type of every reducing operator and of point lookups, and it can be
//! awaited directly with [`Mono::resolve`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::{Error, Result};
use crate::core::subscription::{Emitter, Upstream};
use crate::core::traits::{BoxPublisher, Publisher, PublisherExt};
use crate::scheduler::Scheduler;
use crate::sources::{EmptySource, ErrorSource, IterSource};

/// A publisher of zero or one value.
pub struct Mono<T> {
    inner: BoxPublisher<T>,
}

impl<T: Send + 'static> Mono<T> {
    /// Emit `value`, then complete
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_single(IterSource::new(Some(value)))
    }

    /// Complete without a value
    pub fn empty() -> Self {
        Self::from_single(EmptySource::new())
    }

    /// Fail with `error`
    pub fn error(error: Error) -> Self {
        Self::from_single(ErrorSource::new(error))
    }

    /// Wrap an arbitrary publisher.
    ///
    /// The first value is relayed as soon as it arrives. A second value is a
    /// protocol violation: upstream is cancelled and the subscription ends
    /// with `Error::Protocol`.
    pub fn from_publisher<P>(publisher: P) -> Self
    where
        P: Publisher<Item = T>,
    {
        Self::from_single(AtMostOne {
            upstream: Arc::new(publisher),
        })
    }

    /// Wrap a publisher that is known to emit at most one value.
    pub(crate) fn from_single<P>(publisher: P) -> Self
    where
        P: Publisher<Item = T>,
    {
        Self {
            inner: BoxPublisher::new(publisher),
        }
    }

    /// Transform the value, if any
    pub fn map<U, F>(self, f: F) -> Mono<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Mono::from_single(self.inner.map(f))
    }

    /// Produce the value on a lane of `scheduler`
    pub fn subscribe_on(self, scheduler: &Scheduler) -> Mono<T> {
        Mono::from_single(self.inner.subscribe_on(scheduler))
    }

    /// Subscribe and wait for the outcome: `Ok(Some(value))`, `Ok(None)` when
    /// the publisher completed empty, or the error signal.
    pub async fn resolve(self) -> Result<Option<T>> {
        let mut upstream = Upstream::subscribe(Arc::new(self.inner), 2);
        let value = upstream.next().await?;
        if value.is_some() && upstream.next().await?.is_some() {
            return Err(Error::protocol("single-value publisher emitted a second value"));
        }
        Ok(value)
    }
}

impl<T> Clone for Mono<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Publisher for Mono<T> {
    type Item = T;

    async fn produce(&self, emitter: &mut Emitter<T>) -> Result<()> {
        self.inner.produce(emitter).await
    }
}

struct AtMostOne<P> {
    upstream: Arc<P>,
}

#[async_trait]
impl<P: Publisher> Publisher for AtMostOne<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), 2);
        let Some(value) = upstream.next().await? else {
            return Ok(());
        };
        emitter.emit(value).await?;
        if upstream.next().await?.is_some() {
            upstream.cancel();
            tracing::error!(subscription = %emitter.id(), "single-value publisher emitted a second value");
            #[cfg(feature = "metrics")]
            crate::metrics::record_protocol_violation();
            return Err(Error::protocol("single-value publisher emitted a second value"));
        }
        Ok(())
    }
}
