//! The three signals a subscription can deliver.

use std::fmt;

use crate::core::error::Error;

/// One signal travelling downstream on a subscription.
#[derive(Debug, Clone)]
pub enum Signal<T> {
    /// A value
    Next(T),
    /// Terminal failure
    Error(Error),
    /// Terminal success
    Complete,
}

impl<T> Signal<T> {
    /// Whether this signal ends the subscription.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Next(_))
    }

    /// Short name used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Next(_) => "next",
            Signal::Error(_) => "error",
            Signal::Complete => "complete",
        }
    }
}

impl<T: fmt::Debug> fmt::Display for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Next(value) => write!(f, "onNext({:?})", value),
            Signal::Error(error) => write!(f, "onError({})", error),
            Signal::Complete => write!(f, "onComplete()"),
        }
    }
}
