//! Error types for hostloop.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised synchronously by the event loop.
#[derive(Debug, Error)]
pub enum LoopError {
    /// `run_forever` / `run_until_complete` was re-entered.
    #[error("event loop is already running")]
    AlreadyRunning,

    /// `close` was called while the loop was running.
    #[error("cannot close a running event loop")]
    Running,

    /// The loop has been closed.
    #[error("event loop is closed")]
    Closed,

    /// The loop stopped before the awaited future completed.
    #[error("event loop stopped before the future completed")]
    Incomplete,

    /// A negative or otherwise unusable file descriptor.
    #[error("invalid file descriptor: {0}")]
    InvalidFd(i64),

    /// The host loop failed to create a notifier or wake primitive.
    #[error("host loop I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The thread-pool executor rejected the request.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The awaited future was cancelled or failed.
    #[error(transparent)]
    Future(#[from] FutureError),

    /// Loop configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by the thread-pool executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor was already shut down.
    #[error("thread pool executor has been shut down")]
    Shutdown,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors observed when reading the outcome of a future.
#[derive(Debug, Clone, Error)]
pub enum FutureError {
    /// The future was cancelled before it produced a value.
    #[error("future was cancelled")]
    Cancelled,

    /// A blocking wait gave up before the future finished.
    #[error("timed out waiting for the future")]
    Timeout,

    /// The operation is not valid in the future's current state.
    #[error("invalid future state: {0}")]
    InvalidState(&'static str),

    /// The callback behind the future failed.
    #[error(transparent)]
    Failed(#[from] CallbackError),
}

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The backend identifier is not one of the registered backends.
    #[error("unknown backend `{given}`, expected one of [{registered}]")]
    UnknownBackend { given: String, registered: String },

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

/// The failure of a user callback.
///
/// Callbacks either return an error (`Raised`) or panic (`Panicked`). The
/// error is reference counted so every observer of a future sees the same
/// value.
#[derive(Clone, Error)]
pub enum CallbackError {
    /// The callback returned an error.
    #[error("{0}")]
    Raised(Arc<anyhow::Error>),

    /// The callback panicked.
    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    /// Wraps an error returned by a callback.
    pub fn raised<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        CallbackError::Raised(Arc::new(error.into()))
    }

    /// Converts a panic payload captured by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        CallbackError::Panicked(message)
    }

    /// Returns the concrete error raised by the callback, if it is an `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            CallbackError::Raised(error) => error.downcast_ref::<E>(),
            CallbackError::Panicked(_) => None,
        }
    }

    /// Returns `true` if the callback panicked instead of returning an error.
    pub fn is_panic(&self) -> bool {
        matches!(self, CallbackError::Panicked(_))
    }
}

impl fmt::Debug for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackError::Raised(error) => f.debug_tuple("Raised").field(error).finish(),
            CallbackError::Panicked(message) => f.debug_tuple("Panicked").field(message).finish(),
        }
    }
}

/// Returned by [`timeout`](crate::time::timeout) when the deadline passes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline has elapsed")]
pub struct Elapsed;

/// Result type alias for event loop operations.
pub type Result<T> = std::result::Result<T, LoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct ValueError(String);

    #[test]
    fn test_downcast_raised_error() {
        let err = CallbackError::raised(ValueError("x".to_string()));
        let inner = err.downcast_ref::<ValueError>().expect("ValueError");
        assert_eq!(inner.0, "x");
        assert_eq!(err.to_string(), "x");
        assert!(!err.is_panic());
    }

    #[test]
    fn test_panic_payloads() {
        let err = CallbackError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "callback panicked: boom");

        let err = CallbackError::from_panic(Box::new(String::from("owned")));
        assert!(err.is_panic());
        assert!(err.downcast_ref::<ValueError>().is_none());

        let err = CallbackError::from_panic(Box::new(42u32));
        assert_eq!(err.to_string(), "callback panicked: non-string panic payload");
    }

    #[test]
    fn test_unknown_backend_message() {
        let err = ConfigError::UnknownBackend {
            given: "qt".into(),
            registered: "epoll, poll".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown backend `qt`, expected one of [epoll, poll]"
        );
    }
}
