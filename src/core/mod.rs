//! Core traits and types for the fluxweld library.
//!
//! This module contains the publisher/subscriber traits, the demand protocol
//! and the error type every signal carries.

pub(crate) mod arena;
pub mod error;
pub mod signal;
pub mod subscription;
pub mod traits;

// Re-export core items
pub use error::{Error, IntoError, Result};
pub use signal::Signal;
pub use subscription::{Emitter, Subscription, SubscriptionId, Upstream, UNBOUNDED};
pub use traits::{BoxPublisher, Publisher, PublisherExt, Subscriber};
