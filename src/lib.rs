//! # Reactive streams with demand-driven backpressure for Rust
//!
//! This crate provides cold asynchronous sequences whose consumers control
//! the flow with explicit demand, in the style of the Reactive Streams
//! protocol, built on tokio.
//!
//! ## Core Concepts
//!
//! - **Publisher**: A reusable blueprint for a sequence; every subscription
//!   replays it from the start
//! - **Subscription**: The live link carrying demand and cancellation
//! - **Operators**: map, filter, flat_map, buffer, distinct, skip/take and
//!   their time-bounded forms, collectors and combinators
//! - **Mono**: A publisher of at most one value
//! - **Scheduler**: Worker lanes that subscriptions can be moved onto
//! - **Clock**: System or virtual time for time-based stages
//! - **StepVerifier**: Scripted checks of the signals a publisher emits
//!
//! ## Example
//!
//! ```rust
//! use fluxweld::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<()> {
//!     let eaters = zip_with(
//!         just(vec!["Garfield", "Kojak", "Barbossa"]),
//!         just(vec!["Lasagna", "Lollipops", "Apples"]),
//!         |who, food| format!("{who} eats {food}"),
//!     );
//!
//!     let lines = eaters.collect_list().resolve().await?.unwrap_or_default();
//!     assert_eq!(lines[0], "Garfield eats Lasagna");
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod core;
pub mod customers;
pub mod mono;
pub mod processors;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod verifier;

// Re-export commonly used items
pub mod prelude {
    pub use crate::clock::Clock;
    pub use crate::config::{FlowConfig, SchedulerConfig};
    pub use crate::core::{
        BoxPublisher, Emitter, Error, IntoError, Publisher, PublisherExt, Result, Signal,
        Subscriber, Subscription, UNBOUNDED,
    };
    pub use crate::mono::Mono;
    pub use crate::processors::combinators::{
        first, merge, merge_with_config, zip, zip_all, zip_with,
    };
    pub use crate::processors::share::Share;
    pub use crate::scheduler::Scheduler;
    pub use crate::sinks::{CollectSubscriber, FnSubscriber, SignalStream};
    pub use crate::sources::{
        interval, just, range, EmptySource, ErrorSource, IntervalSource, IterSource,
        NeverSource, StreamSource,
    };
    pub use crate::verifier::StepVerifier;
}

// Re-export main error type
pub use crate::core::error::{Error, Result};

// Feature flags for optional dependencies
#[cfg(feature = "metrics")]
pub mod metrics;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
