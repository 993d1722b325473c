//! Error types for the runtime.

/// Error type for runtime operations.
///
/// The variants form a closed set; [`Error::kind`] gives a copyable
/// discriminant for matching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unsupported datatype or operator, or a malformed call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A bounded resource (segment pool, local window) is exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Unknown team or segment.
    #[error("not found: {0}")]
    NotFound(String),
    /// Fabric call failed.
    #[error("communication error: {0}")]
    Fabric(#[from] fabric::Error),
    /// Protocol violation, e.g. a notification carrying the wrong value.
    #[error("communication error: {0}")]
    Protocol(String),
    /// Capability intentionally not provided by this runtime.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    ResourceExhausted,
    NotFound,
    Communication,
    Unsupported,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Fabric(_) | Error::Protocol(_) => ErrorKind::Communication,
            Error::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
