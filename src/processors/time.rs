//! Operators driven by a [`Clock`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::config::DEFAULT_PREFETCH;
use crate::core::error::Result;
use crate::core::subscription::{Emitter, Upstream};
use crate::core::traits::Publisher;

/// Delays every value, the first one included, by a fixed duration after
/// the previous emission.
pub struct DelayElements<P> {
    upstream: Arc<P>,
    delay: Duration,
    clock: Clock,
}

impl<P> DelayElements<P> {
    /// Create a new element delay
    pub fn new(upstream: P, delay: Duration, clock: Clock) -> Self {
        Self {
            upstream: Arc::new(upstream),
            delay,
            clock,
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for DelayElements<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        while let Some(item) = upstream.next().await? {
            self.clock.sleep(self.delay).await;
            emitter.emit(item).await?;
        }
        Ok(())
    }
}

/// Postpones the upstream subscription, and with it all demand.
pub struct DelaySubscription<P> {
    upstream: Arc<P>,
    delay: Duration,
    clock: Clock,
}

impl<P> DelaySubscription<P> {
    /// Create a new subscription delay
    pub fn new(upstream: P, delay: Duration, clock: Clock) -> Self {
        Self {
            upstream: Arc::new(upstream),
            delay,
            clock,
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for DelaySubscription<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        self.clock.sleep(self.delay).await;
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        while let Some(item) = upstream.next().await? {
            emitter.emit(item).await?;
        }
        Ok(())
    }
}

/// Drops every value that arrives before `window` has elapsed since
/// subscription.
pub struct SkipFor<P> {
    upstream: Arc<P>,
    window: Duration,
    clock: Clock,
}

impl<P> SkipFor<P> {
    /// Create a new time-bounded skip
    pub fn new(upstream: P, window: Duration, clock: Clock) -> Self {
        Self {
            upstream: Arc::new(upstream),
            window,
            clock,
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for SkipFor<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let opened = self.clock.now() + self.window;
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        while let Some(item) = upstream.next().await? {
            if self.clock.now() >= opened {
                emitter.emit(item).await?;
            }
        }
        Ok(())
    }
}

/// Relays values until `window` has elapsed since subscription, then cancels
/// upstream and completes.
pub struct TakeFor<P> {
    upstream: Arc<P>,
    window: Duration,
    clock: Clock,
}

impl<P> TakeFor<P> {
    /// Create a new time-bounded take
    pub fn new(upstream: P, window: Duration, clock: Clock) -> Self {
        Self {
            upstream: Arc::new(upstream),
            window,
            clock,
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for TakeFor<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let deadline = self.clock.sleep_until(self.clock.now() + self.window);
        tokio::pin!(deadline);
        let mut upstream = Upstream::subscribe(Arc::clone(&self.upstream), DEFAULT_PREFETCH);
        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    upstream.cancel();
                    return Ok(());
                }
                next = upstream.next() => match next? {
                    Some(item) => emitter.emit(item).await?,
                    None => return Ok(()),
                },
            }
        }
    }
}
