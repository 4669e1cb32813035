//! Credential store error types.

use thiserror::Error;

/// Result type for credential store operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors raised by the credential stores.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The platform data directory could not be determined.
    #[error("Could not determine data directory")]
    NoDataDir,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to restrict file permissions.
    #[error("Permissions error: {0}")]
    Permissions(String),
}
