//! Worker lanes that subscriptions can be moved onto.
//!
//! A [`Scheduler`] owns a fixed pool of lanes. Each lane is a dedicated OS
//! thread driving a single-threaded tokio runtime; work is handed to it
//! through the runtime handle. The scheduler only decides where producing
//! tasks run, values stay owned by the stages that move them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

use crate::config::{SchedulerConfig, DEFAULT_PREFETCH};
use crate::core::error::{Error, Result};
use crate::core::subscription::{Emitter, Upstream};
use crate::core::traits::Publisher;

struct Inner {
    name: String,
    lanes: Vec<Handle>,
    next: AtomicUsize,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.lanes.is_empty() {
            tracing::debug!(scheduler = %self.name, "stopping lanes");
        }
        self.shutdown.cancel();
    }
}

/// A cheaply cloneable handle to a pool of lanes.
///
/// Lanes stop when the last handle is dropped or [`Scheduler::dispose`] is
/// called. Stopping does not wait for running work; tasks still on a lane are
/// dropped with its runtime, which cancels their subscriptions.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a pool of lanes from a configuration
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        if config.lanes == 0 {
            return Err(Error::invalid_argument("a scheduler needs at least one lane"));
        }

        let shutdown = CancellationToken::new();
        let lanes = start_lanes(config.lanes, &shutdown, |index, stop| {
            start_lane(format!("{}-{}", config.name, index), stop)
        })?;

        Ok(Self {
            inner: Arc::new(Inner {
                name: config.name,
                lanes,
                next: AtomicUsize::new(0),
                shutdown,
            }),
        })
    }

    /// Create `lanes` lanes whose threads are named `{name}-{i}`
    pub fn parallel(name: impl Into<String>, lanes: usize) -> Result<Self> {
        Self::new(SchedulerConfig::new().name(name).lanes(lanes))
    }

    /// A scheduler that runs work on the caller's runtime
    pub fn immediate() -> Self {
        Self {
            inner: Arc::new(Inner {
                name: "immediate".to_string(),
                lanes: Vec::new(),
                next: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Name of the pool
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of dedicated lanes; zero for the immediate scheduler
    pub fn lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Whether the lanes have been stopped
    pub fn is_disposed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Runtime handle of the next lane, picked round-robin
    pub fn handle(&self) -> Result<Handle> {
        if self.is_disposed() {
            return Err(Error::Scheduler(format!(
                "scheduler '{}' is disposed",
                self.inner.name
            )));
        }
        if self.inner.lanes.is_empty() {
            return Handle::try_current().map_err(|e| Error::Scheduler(e.to_string()));
        }
        let index = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.lanes.len();
        Ok(self.inner.lanes[index].clone())
    }

    /// Run a future on the next lane
    pub fn spawn<F>(&self, future: F) -> Result<tokio::task::JoinHandle<F::Output>>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Ok(self.handle()?.spawn(future))
    }

    /// Stop every lane of this pool, for all handles
    pub fn dispose(&self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("lanes", &self.inner.lanes.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Start `count` lanes; if one fails, the lanes already running are stopped.
fn start_lanes<F>(count: usize, shutdown: &CancellationToken, mut start: F) -> Result<Vec<Handle>>
where
    F: FnMut(usize, CancellationToken) -> Result<Handle>,
{
    let mut lanes = Vec::with_capacity(count);
    for index in 0..count {
        match start(index, shutdown.clone()) {
            Ok(lane) => lanes.push(lane),
            Err(error) => {
                tracing::warn!(lane = index, %error, "lane failed to start, stopping the others");
                shutdown.cancel();
                return Err(error);
            }
        }
    }
    Ok(lanes)
}

fn start_lane(lane_name: String, stop: CancellationToken) -> Result<Handle> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .thread_name(lane_name.clone())
        .build()?;
    let handle = runtime.handle().clone();

    thread::Builder::new().name(lane_name.clone()).spawn(move || {
        tracing::debug!(lane = %lane_name, "lane started");
        runtime.block_on(stop.cancelled());
        tracing::debug!(lane = %lane_name, "lane stopped");
    })?;
    Ok(handle)
}

/// Subscribes to its upstream from a scheduler lane, so the upstream chain
/// produces there. Delivery downstream stays in order.
pub struct SubscribeOn<P> {
    upstream: Arc<P>,
    scheduler: Scheduler,
    prefetch: u64,
}

impl<P> SubscribeOn<P> {
    /// Create a new subscribe-on stage
    pub fn new(upstream: P, scheduler: Scheduler) -> Self {
        Self {
            upstream: Arc::new(upstream),
            scheduler,
            prefetch: DEFAULT_PREFETCH,
        }
    }

    /// Set the demand batch requested from the lane
    pub fn prefetch(mut self, prefetch: u64) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }
}

#[async_trait]
impl<P: Publisher> Publisher for SubscribeOn<P> {
    type Item = P::Item;

    async fn produce(&self, emitter: &mut Emitter<Self::Item>) -> Result<()> {
        let lane = self.scheduler.handle()?;
        let mut upstream = Upstream::subscribe_on(Arc::clone(&self.upstream), &lane, self.prefetch);
        while let Some(item) = upstream.next().await? {
            emitter.emit(item).await?;
        }
        Ok(())
    }
}
