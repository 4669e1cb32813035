//! PTY error types.

use thiserror::Error;

/// Result type for PTY operations.
pub type PtyResult<T> = Result<T, PtyError>;

/// Errors raised by the multiplexer.
///
/// The idempotent operations (`write`, `resize`, `remove` on an unknown
/// id) never raise; only `connect` reports a missing session.
#[derive(Debug, Error)]
pub enum PtyError {
    /// Failed to open or spawn the PTY child.
    #[error("PTY spawn failed: {0}")]
    Spawn(String),

    /// The referenced session does not exist (or was removed).
    #[error("PTY session not found: {0}")]
    NotFound(String),

    /// The subscriber sink was closed during backlog replay.
    #[error("Subscriber closed during replay")]
    SubscriberClosed,

    /// IO error on the child's streams.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
