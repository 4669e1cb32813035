//! MCP error types.

use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Stage at which an OAuth flow failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthStage {
    Discovery,
    Registration,
    Redirect,
    Exchange,
    Refresh,
}

impl OAuthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthStage::Discovery => "discovery",
            OAuthStage::Registration => "registration",
            OAuthStage::Redirect => "redirect",
            OAuthStage::Exchange => "exchange",
            OAuthStage::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for OAuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// No such configured server.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// No connected server exposes the named tool.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The named server requires the user to run the auth flow.
    #[error("Authentication required for {0}")]
    AuthRequired(String),

    /// Raw `401` from a transport; the manager resolves it into
    /// [`McpError::AuthRequired`] or a token refresh.
    #[error("Unauthorized")]
    Unauthorized {
        www_authenticate: Option<String>,
    },

    /// Connection or tool-call failure against a named server.
    #[error("MCP transport error ({name}): {message}")]
    Transport { name: String, message: String },

    /// OAuth flow failure at a specific stage.
    #[error("OAuth failed at {stage}: {message}")]
    OAuth {
        stage: OAuthStage,
        message: String,
    },

    /// Protocol-level error (malformed JSON-RPC, missing result).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server initialization failed.
    #[error("Server initialization failed: {0}")]
    InitializationFailed(String),

    /// Tool execution failed server-side.
    #[error("Tool execution failed: {0}")]
    ToolError(String),

    /// Request timed out.
    #[error("Server timeout")]
    Timeout,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credential store failure.
    #[error("Credential store error: {0}")]
    Store(#[from] tidecode_auth::AuthError),
}

impl McpError {
    /// Create a transport error bound to a server name.
    pub fn transport(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an OAuth error at a stage.
    pub fn oauth(stage: OAuthStage, message: impl Into<String>) -> Self {
        Self::OAuth {
            stage,
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            McpError::ServerNotFound("linear".to_string()).to_string(),
            "Server not found: linear"
        );
        assert_eq!(
            McpError::AuthRequired("linear".to_string()).to_string(),
            "Authentication required for linear"
        );
        assert_eq!(
            McpError::transport("linear", "connection refused").to_string(),
            "MCP transport error (linear): connection refused"
        );
        assert_eq!(
            McpError::oauth(OAuthStage::Exchange, "invalid_grant").to_string(),
            "OAuth failed at exchange: invalid_grant"
        );
        assert_eq!(McpError::Timeout.to_string(), "Server timeout");
    }

    #[test]
    fn test_oauth_stage_names() {
        assert_eq!(OAuthStage::Discovery.as_str(), "discovery");
        assert_eq!(OAuthStage::Registration.as_str(), "registration");
        assert_eq!(OAuthStage::Redirect.as_str(), "redirect");
        assert_eq!(OAuthStage::Exchange.as_str(), "exchange");
        assert_eq!(OAuthStage::Refresh.as_str(), "refresh");
    }
}
