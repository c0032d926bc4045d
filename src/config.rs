//! Tunables for operators and schedulers.

/// Demand requested from an upstream in one batch.
pub const DEFAULT_PREFETCH: u64 = 32;

/// Capacity of the channel fan-in stages use to collect inner values.
pub const DEFAULT_INNER_BUFFER: usize = 32;

/// Configuration for demand batching and fan-in concurrency
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowConfig {
    /// Values requested from each upstream per batch
    pub prefetch: u64,
    /// Maximum number of inner subscriptions alive at once; `None` is
    /// unbounded
    pub max_concurrency: Option<usize>,
    /// Capacity of the fan-in channel shared by inner subscriptions
    pub inner_buffer: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            max_concurrency: None,
            inner_buffer: DEFAULT_INNER_BUFFER,
        }
    }
}

impl FlowConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prefetch batch size
    pub fn prefetch(mut self, prefetch: u64) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Bound the number of concurrent inner subscriptions
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    /// Allow any number of concurrent inner subscriptions
    pub fn unbounded_concurrency(mut self) -> Self {
        self.max_concurrency = None;
        self
    }

    /// Set the fan-in channel capacity
    pub fn inner_buffer(mut self, size: usize) -> Self {
        self.inner_buffer = size.max(1);
        self
    }
}

/// Configuration for a pool of scheduler lanes
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
    /// Prefix of lane thread names
    pub name: String,
    /// Number of lanes
    pub lanes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "parallel".to_string(),
            lanes: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name prefix
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of lanes
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }
}
