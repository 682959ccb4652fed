use std::io;

use thiserror::Error;

/// Errors raised by transforms, factories, and the registry.
///
/// The variants follow the failure taxonomy callers need to tell apart:
/// bad configuration, caller bugs (illegal state), "we don't understand this
/// object's transform", and plain I/O failures from the wrapped streams.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Invalid level, malformed identifier, unknown algorithm token.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not legal in the current transform/stream state.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// No registered factory claims the stored transform identifier.
    #[error("no matching transform for {class}:{config}")]
    NoMatchingTransform { class: String, config: String },

    /// Registry lookup for a class that was never registered.
    #[error("transform class {0} is not registered")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TransformError>;

impl TransformError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<TransformError> for io::Error {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

/// Error returned by `Read`/`Write` impls once their stream has been closed.
pub fn closed_stream_error() -> io::Error {
    io::Error::other(TransformError::IllegalState("stream already closed"))
}
