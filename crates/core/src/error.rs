//! Unified error type for the WeaveDB core.
//!
//! Every crate in the workspace returns `weave_core::Result<T>`. The kinds
//! mirror spec §7 exactly; no crate defines a parallel error enum.

use thiserror::Error;

/// Result type alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the WeaveDB core.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-provided violation: bad dimension, missing required field,
    /// empty metric, column-count mismatch, unknown index.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Key, CTE name, or other named resource not present in the current
    /// scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// An index would violate its own invariant.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying KV failure, or file I/O failure during vector index
    /// save/load or CTE spill.
    #[error("I/O error: {0}")]
    Io(String),

    /// Deadline exceeded at a cooperative checkpoint.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Caller requested cancellation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Broken invariant surfaced by a component that otherwise remains
    /// consistent (malformed chunk, Gorilla decode error after a valid
    /// header, etc).
    #[error("internal error: {0}")]
    Internal(String),

    /// Expression-level failure during query execution (division by zero,
    /// type mismatch on arithmetic).
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization error: {e}"))
    }
}

impl Error {
    /// Shorthand for `InvalidArgument`.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Shorthand for `NotFound`.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Shorthand for `Internal`.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Shorthand for `Runtime`.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }

    /// True for errors a caller may retry without changing its request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Io(_))
    }
}
