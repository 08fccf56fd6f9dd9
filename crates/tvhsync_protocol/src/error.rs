//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while interpreting HTSP messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A required field is missing.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// A field is present but has the wrong type.
    #[error("field '{field}' is not {expected}")]
    WrongType {
        /// Field name.
        field: String,
        /// Expected type name.
        expected: &'static str,
    },

    /// The message carries no `method` field.
    #[error("message has no method")]
    NoMethod,

    /// The server rejected a request.
    #[error("server rejected request: {0}")]
    Rejected(String),
}

impl ProtocolError {
    /// Creates a wrong-type error for a field.
    pub fn wrong_type(field: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.into(),
            expected,
        }
    }
}
