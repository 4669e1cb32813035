//! ULID-based identifier generation with prefixes.
//!
//! Identifiers in tidecode follow the pattern `prefix_ulid`,
//! e.g. `pty_01hqxyz...` for terminal sessions.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    /// PTY session.
    Pty,
    /// Tool call.
    Call,
    /// MCP connection.
    Connection,
}

impl IdPrefix {
    /// Get the string prefix for this identifier type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Pty => "pty",
            IdPrefix::Call => "cal",
            IdPrefix::Connection => "con",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pty" => Some(IdPrefix::Pty),
            "cal" => Some(IdPrefix::Call),
            "con" => Some(IdPrefix::Connection),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    pub fn ascending(prefix: IdPrefix) -> String {
        let ulid = Ulid::new();
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Generate an identifier with a specific ULID (for testing or imports).
    pub fn with_ulid(prefix: IdPrefix, ulid: Ulid) -> String {
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Parse an identifier into its prefix and ULID parts.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let (prefix, rest) = id.split_once('_')?;
        let prefix = IdPrefix::parse(prefix)?;
        let ulid = Ulid::from_string(rest).ok()?;
        Some((prefix, ulid))
    }

    /// Check if an identifier has the expected prefix.
    pub fn has_prefix(id: &str, prefix: IdPrefix) -> bool {
        id.starts_with(prefix.as_str()) && id.chars().nth(prefix.as_str().len()) == Some('_')
    }

    /// Generate a PTY session ID.
    pub fn pty() -> String {
        Self::ascending(IdPrefix::Pty)
    }

    /// Generate a tool call ID.
    pub fn call() -> String {
        Self::ascending(IdPrefix::Call)
    }
}
