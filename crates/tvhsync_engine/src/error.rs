//! Error types for the sync engine.

use thiserror::Error;
use tvhsync_protocol::ProtocolError;
use tvhsync_store::StoreError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Broad class of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The host name could not be resolved.
    Resolve,
    /// The socket could not be opened or broke.
    Socket,
    /// The connection attempt was interrupted.
    Interrupted,
    /// The link was closed.
    Closed,
    /// Anything else.
    Other,
}

/// A failure reported by a [`Transport`](crate::Transport) or [`Link`](crate::Link).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    /// Failure class.
    pub kind: TransportErrorKind,
    /// Error message.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a closed-link error.
    pub fn closed() -> Self {
        Self::new(TransportErrorKind::Closed, "link closed")
    }
}

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The connection did not reach the authenticated state in time.
    #[error("not authenticated")]
    NotAuthenticated,

    /// There is no open connection.
    #[error("not connected to server")]
    NotConnected,

    /// A response did not arrive in time.
    #[error("operation timed out")]
    Timeout,

    /// Network or transport error.
    #[error("transport error ({kind:?}): {message}")]
    Transport {
        /// Failure class.
        kind: TransportErrorKind,
        /// Error message.
        message: String,
    },

    /// A message could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The repository failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An icon could not be fetched or transcoded.
    #[error("icon error: {0}")]
    Icon(String),

    /// Local I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with an error.
    #[error("server rejected request: {0}")]
    ServerRejected(String),
}

impl EngineError {
    /// Creates an icon error.
    pub fn icon(message: impl Into<String>) -> Self {
        Self::Icon(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { kind, .. } => *kind != TransportErrorKind::Resolve,
            EngineError::Timeout => true,
            EngineError::NotConnected => true,
            EngineError::NotAuthenticated => true,
            _ => false,
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Closed => EngineError::NotConnected,
            kind => EngineError::Transport {
                kind,
                message: err.message,
            },
        }
    }
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::Icon(err.to_string())
    }
}
