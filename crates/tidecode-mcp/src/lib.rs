//! Model Context Protocol (MCP) connections for tidecode.
//!
//! One connection per configured MCP server, local or remote:
//!
//! ```text
//! ┌──────────┐     ┌─────────────┐     ┌──────────────────┐
//! │ tidecode │────▶│ McpManager  │────▶│ MCP servers      │
//! │  (chat)  │◀────│  + OAuth    │◀────│ (stdio / HTTP)   │
//! └──────────┘     └─────────────┘     └──────────────────┘
//! ```
//!
//! Remote servers speak streamable HTTP JSON-RPC and may demand OAuth:
//! a `401` with `WWW-Authenticate` flips the connection to `needs_auth`
//! and [`McpManager::authenticate`] drives the authorization-code + PKCE
//! flow, persisting tokens through [`tidecode_auth::McpAuthStore`].
//! Local servers are spawned child processes speaking line-delimited
//! JSON-RPC over stdio.
//!
//! Tools discovered on a connection are registered as
//! `<serverName>_<toolName>` so same-named tools on different servers
//! never collide silently.

pub mod callback;
mod error;
pub mod manager;
pub mod oauth;
pub mod protocol;
mod stdio;
mod streamable;
mod transport;

pub use callback::CallbackListener;
pub use error::{McpError, McpResult, OAuthStage};
pub use manager::{McpManager, PrefixedTool};
pub use oauth::OAuthProvider;
pub use protocol::{McpTool, ToolCallResult, ToolContent};
pub use stdio::StdioTransport;
pub use streamable::{StreamableHttpConfig, StreamableHttpTransport};
pub use transport::Transport;
