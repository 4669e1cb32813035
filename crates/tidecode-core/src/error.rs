//! Configuration error types.

use thiserror::Error;

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while validating the configuration record.
///
/// These are fatal at startup and recoverable only by a user edit.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A pinned model reference is not of the form `provider/model`.
    #[error("Invalid model reference: {0} (expected \"provider/model\")")]
    InvalidModelRef(String),

    /// A local MCP entry has an empty command line.
    #[error("MCP server {0}: empty command")]
    EmptyMcpCommand(String),

    /// A remote MCP entry has an unparseable URL.
    #[error("MCP server {name}: invalid URL {url}")]
    InvalidMcpUrl { name: String, url: String },

    /// A provider declares a whitelist and a blacklist at once.
    #[error("Provider {0}: whitelist and blacklist are mutually exclusive")]
    ConflictingModelFilters(String),
}
