//! Error types for the reactive runtime.

use std::sync::Arc;

/// The main error type carried by error signals.
///
/// Errors are `Clone` because a cold publisher may replay the same failure to
/// every subscriber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A user callback (map, filter, flat_map mapper, ...) failed
    #[error("Callback error: {0}")]
    Callback(Arc<dyn std::error::Error + Send + Sync>),

    /// The demand protocol was violated (over-emission, request(0), a second
    /// value from a single-value publisher)
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A producer had a value ready but no outstanding demand to emit it
    #[error("Backpressure overflow: {0}")]
    Overflow(String),

    /// An operator was configured with an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The subscription was cancelled by its subscriber
    #[error("Subscription was cancelled")]
    Cancelled,

    /// A channel was closed unexpectedly
    #[error("Channel was closed unexpectedly")]
    ChannelClosed,

    /// An operation timed out
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A scheduler lane could not be started
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// A StepVerifier expectation did not match the observed signals
    #[error("Verification failed: {0}")]
    Verification(String),

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a callback error from any error type
    pub fn callback<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Callback(Arc::new(error))
    }

    /// Create a protocol violation error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Error::Protocol(message.into())
    }

    /// Create a backpressure overflow error
    pub fn overflow<S: Into<String>>(message: S) -> Self {
        Error::Overflow(message.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a verification failure
    pub fn verification<S: Into<String>>(message: S) -> Self {
        Error::Verification(message.into())
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// True for the silent stop a cancelled producer returns.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

// Common conversions
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Custom(format!("Timeout: {}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Scheduler(e.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for turning foreign errors raised inside user callbacks
/// into error signals.
pub trait IntoError<T> {
    fn into_callback_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_callback_error(self) -> Result<T> {
        self.map_err(Error::callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_error_display() {
        let parsed = "forty-two".parse::<i32>().into_callback_error();
        let err = parsed.unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
        assert!(err.to_string().starts_with("Callback error:"));
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(
            Error::timeout(250).to_string(),
            "Operation timed out after 250ms"
        );
    }
}
