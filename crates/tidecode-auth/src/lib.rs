//! Durable credential storage for tidecode.
//!
//! Two stores live here:
//!
//! - [`McpAuthStore`] — one JSON document (`mcp-auth.json`) holding OAuth
//!   tokens, dynamic-registration client info and in-flight PKCE verifiers,
//!   keyed by configured MCP server name.
//! - [`ApiKeyStore`] — provider API keys recorded by the auth command
//!   (`auth.json`), consumed during registry construction.
//!
//! Both write atomically (temp file + rename) and tolerate missing files
//! and partially-invalid content.

mod api_keys;
mod error;
mod mcp_store;

pub use api_keys::{ApiKeyStore, AuthInfo};
pub use error::{AuthError, AuthResult};
pub use mcp_store::{McpAuthRecord, McpAuthStore, StoredClientInfo, StoredTokens};
