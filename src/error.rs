//! Error types for hv-plugin

use std::path::PathBuf;

use thiserror::Error;

use crate::hypervisor::Operation;

/// Result type alias using hv-plugin Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hv-plugin operations
#[derive(Error, Debug)]
pub enum Error {
    /// The backend module could not be opened (missing file, wrong binary
    /// format or ABI, or its own static initialization failed)
    #[error("failed to open plugin path {}: {cause}", path.display())]
    ModuleLoad { path: PathBuf, cause: String },

    /// The module does not export the operation
    #[error("failed to lookup function \"{operation}\": {cause}")]
    SymbolNotFound { operation: Operation, cause: String },

    /// The export exists but its shape does not match the contract
    #[error("function \"{operation}\" has signature {found:?}, expected {expected:?}")]
    SignatureMismatch {
        operation: Operation,
        expected: String,
        found: String,
    },

    /// The backend itself returned an error
    #[error("{operation}() failed: {cause}")]
    OperationFailed { operation: Operation, cause: String },

    /// An operation was attempted before `init` produced a backend instance
    #[error("{0}() called before Init")]
    NotInitialized(Operation),

    /// `init` was called on an adapter that already owns a backend instance
    #[error("hypervisor is already initialized")]
    AlreadyInitialized,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// The contract operation this error is attributed to, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Error::SymbolNotFound { operation, .. }
            | Error::SignatureMismatch { operation, .. }
            | Error::OperationFailed { operation, .. } => Some(*operation),
            Error::NotInitialized(operation) => Some(*operation),
            _ => None,
        }
    }

    /// Shorthand for a backend-reported failure.
    pub fn operation_failed(operation: Operation, cause: impl Into<String>) -> Self {
        Error::OperationFailed {
            operation,
            cause: cause.into(),
        }
    }
}
