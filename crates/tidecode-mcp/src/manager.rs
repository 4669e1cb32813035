//! MCP connection manager.
//!
//! Owns one connection per configured MCP server and tracks its status.
//! Startup connects every enabled entry concurrently; a server demanding
//! OAuth parks at `needs_auth` without blocking the others. Tools are
//! registered under `<serverName>_<toolName>` so same-named tools on
//! different servers never collide silently.

use crate::error::{McpError, McpResult, OAuthStage};
use crate::oauth::OAuthProvider;
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, McpTool, ToolCallResult,
};
use crate::stdio::StdioTransport;
use crate::streamable::{StreamableHttpConfig, StreamableHttpTransport};
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tidecode_auth::McpAuthStore;
use tidecode_core::bus::{Bus, McpServerStatus, McpStatusChanged};
use tidecode_core::config::McpEntryConfig;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A tool surfaced to the chat orchestrator, name prefixed with its server.
#[derive(Debug, Clone)]
pub struct PrefixedTool {
    /// Registered name: `<serverName>_<toolName>`.
    pub name: String,
    /// The server that provides the tool.
    pub server: String,
    /// The tool as the server exposes it.
    pub tool: McpTool,
}

/// A live (or parked) connection to one configured server.
struct Connection {
    entry: McpEntryConfig,
    status: McpServerStatus,
    transport: Option<TransportHandle>,
    /// Tool list cached for the lifetime of the connection.
    tools: Vec<McpTool>,
    oauth: Option<Arc<OAuthProvider>>,
}

/// Concrete transport handle; kept concrete so the HTTP transport's
/// bearer token can be swapped after a refresh.
#[derive(Clone)]
enum TransportHandle {
    Http(Arc<StreamableHttpTransport>),
    Stdio(Arc<StdioTransport>),
}

impl TransportHandle {
    fn as_dyn(&self) -> &dyn Transport {
        match self {
            TransportHandle::Http(t) => t.as_ref(),
            TransportHandle::Stdio(t) => t.as_ref(),
        }
    }
}

/// Lifecycle and status tracking for every configured MCP server.
pub struct McpManager {
    bus: Bus,
    connections: RwLock<HashMap<String, Connection>>,
    next_id: AtomicU64,
}

impl McpManager {
    /// Build the manager from configured entries. No connections are
    /// attempted until [`McpManager::start`].
    pub fn new(
        entries: HashMap<String, McpEntryConfig>,
        store: Arc<McpAuthStore>,
        bus: Bus,
    ) -> Self {
        let mut connections = HashMap::new();
        for (name, entry) in entries {
            let oauth = match &entry {
                McpEntryConfig::Remote { url, oauth, .. } => oauth.settings().map(|settings| {
                    Arc::new(OAuthProvider::new(
                        name.clone(),
                        url.clone(),
                        settings,
                        store.clone(),
                    ))
                }),
                McpEntryConfig::Local { .. } => None,
            };

            let status = if entry.enabled() {
                McpServerStatus::Failed {
                    error: "not connected".to_string(),
                }
            } else {
                McpServerStatus::Disabled
            };

            connections.insert(
                name,
                Connection {
                    entry,
                    status,
                    transport: None,
                    tools: Vec::new(),
                    oauth,
                },
            );
        }

        Self {
            bus,
            connections: RwLock::new(connections),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Connect every enabled entry. Failures are recorded per entry and
    /// never block the others.
    pub async fn start(&self) {
        let names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        let attempts = names.into_iter().map(|name| async move {
            let status = self.connect(&name).await;
            debug!(server = %name, status = ?status, "MCP startup attempt finished");
        });
        futures::future::join_all(attempts).await;
    }

    /// (Re)connect one entry and record the outcome.
    async fn connect(&self, name: &str) -> McpServerStatus {
        let (entry, oauth) = {
            let connections = self.connections.read().await;
            match connections.get(name) {
                Some(conn) => (conn.entry.clone(), conn.oauth.clone()),
                None => {
                    return McpServerStatus::Failed {
                        error: "unknown server".to_string(),
                    }
                }
            }
        };

        if !entry.enabled() {
            self.set_status(name, McpServerStatus::Disabled).await;
            return McpServerStatus::Disabled;
        }

        let outcome = self.open_transport(name, &entry, oauth.as_deref()).await;
        match outcome {
            Ok((transport, tools)) => {
                info!(server = %name, tool_count = tools.len(), "Connected to MCP server");
                let mut connections = self.connections.write().await;
                if let Some(conn) = connections.get_mut(name) {
                    conn.transport = Some(transport);
                    conn.tools = tools;
                    conn.status = McpServerStatus::Connected;
                }
                drop(connections);
                self.publish_status(name, McpServerStatus::Connected);
                McpServerStatus::Connected
            }
            Err(e) => {
                let status = classify_connect_error(&e);
                warn!(server = %name, error = %e, "MCP connection failed");
                self.set_status(name, status.clone()).await;
                status
            }
        }
    }

    /// Spawn or dial the transport and run the initialize handshake.
    async fn open_transport(
        &self,
        name: &str,
        entry: &McpEntryConfig,
        oauth: Option<&OAuthProvider>,
    ) -> McpResult<(TransportHandle, Vec<McpTool>)> {
        let handle = match entry {
            McpEntryConfig::Local {
                command,
                environment,
                ..
            } => TransportHandle::Stdio(Arc::new(StdioTransport::spawn(command, environment)?)),
            McpEntryConfig::Remote { url, .. } => {
                let auth_token = match oauth {
                    Some(provider) => provider.access_token().await?,
                    None => None,
                };
                TransportHandle::Http(Arc::new(StreamableHttpTransport::new(
                    StreamableHttpConfig {
                        url: url.clone(),
                        auth_token,
                        ..Default::default()
                    },
                )?))
            }
        };

        let tools = self.initialize(name, handle.as_dyn()).await?;
        Ok((handle, tools))
    }

    /// `initialize` + `notifications/initialized` + `tools/list`.
    async fn initialize(&self, name: &str, transport: &dyn Transport) -> McpResult<Vec<McpTool>> {
        let params = InitializeParams::default();
        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "initialize",
            Some(serde_json::to_value(&params)?),
        );
        let response = transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::InitializationFailed(error.message));
        }
        let init: InitializeResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol("Missing initialize result"))?,
        )
        .map_err(|e| McpError::protocol(e.to_string()))?;

        debug!(
            server = %name,
            protocol_version = %init.protocol_version,
            server_name = %init.server_info.name,
            "MCP server initialized"
        );

        transport
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        if init.capabilities.tools.is_none() {
            return Ok(Vec::new());
        }

        let request = JsonRpcRequest::new(self.next_request_id(), "tools/list", None);
        let response = transport.request(request).await?;
        if let Some(error) = response.error {
            warn!(server = %name, code = error.code, message = %error.message, "tools/list failed");
            return Ok(Vec::new());
        }
        let result: ListToolsResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol("Missing tools/list result"))?,
        )
        .map_err(|e| McpError::protocol(e.to_string()))?;

        Ok(result.tools)
    }

    /// Status of every configured server.
    pub async fn status(&self) -> HashMap<String, McpServerStatus> {
        let connections = self.connections.read().await;
        connections
            .iter()
            .map(|(name, conn)| (name.clone(), conn.status.clone()))
            .collect()
    }

    /// All registered tools, names prefixed with their server.
    pub async fn tools(&self) -> Vec<PrefixedTool> {
        let connections = self.connections.read().await;
        let mut tools = Vec::new();
        for (name, conn) in connections.iter() {
            if !conn.status.is_connected() {
                continue;
            }
            for tool in &conn.tools {
                tools.push(PrefixedTool {
                    name: format!("{}_{}", name, tool.name),
                    server: name.clone(),
                    tool: tool.clone(),
                });
            }
        }
        tools
    }

    /// Resolve a prefixed tool name back to `(server, tool)`.
    ///
    /// The longest matching server name wins, so a server named `ide`
    /// can never shadow `ide_extra`'s tools.
    pub async fn resolve_tool(&self, prefixed: &str) -> Option<(String, String)> {
        let connections = self.connections.read().await;
        let mut names: Vec<&String> = connections.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        for name in names {
            let tool = prefixed
                .strip_prefix(name.as_str())
                .and_then(|rest| rest.strip_prefix('_'));
            if let Some(tool) = tool {
                if !tool.is_empty() {
                    return Some((name.clone(), tool.to_string()));
                }
            }
        }
        None
    }

    /// Call a tool on a named server.
    ///
    /// A failed connection is retried first. A `401` triggers one lazy
    /// token refresh; a second consecutive `401` escalates to
    /// `needs_auth` and surfaces [`McpError::AuthRequired`].
    pub async fn tool_call(
        &self,
        mcp_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> McpResult<ToolCallResult> {
        // Failed connections get one reconnect attempt per invocation.
        let status = {
            let connections = self.connections.read().await;
            connections
                .get(mcp_name)
                .map(|c| c.status.clone())
                .ok_or_else(|| McpError::ServerNotFound(mcp_name.to_string()))?
        };
        match status {
            McpServerStatus::Failed { .. } => {
                self.connect(mcp_name).await;
            }
            McpServerStatus::Disabled => {
                return Err(McpError::transport(mcp_name, "server is disabled"));
            }
            McpServerStatus::NeedsAuth | McpServerStatus::NeedsClientRegistration { .. } => {
                return Err(McpError::AuthRequired(mcp_name.to_string()));
            }
            McpServerStatus::Connected => {}
        }

        let (handle, oauth) = {
            let connections = self.connections.read().await;
            let conn = connections
                .get(mcp_name)
                .ok_or_else(|| McpError::ServerNotFound(mcp_name.to_string()))?;
            if !conn.status.is_connected() {
                return match &conn.status {
                    McpServerStatus::NeedsAuth => Err(McpError::AuthRequired(mcp_name.to_string())),
                    other => Err(McpError::transport(mcp_name, format!("{other:?}"))),
                };
            }
            if !conn.tools.iter().any(|t| t.name == tool_name) {
                return Err(McpError::ToolNotFound(format!("{mcp_name}_{tool_name}")));
            }
            let handle = conn
                .transport
                .clone()
                .expect("connected server must hold a transport");
            (handle, conn.oauth.clone())
        };

        match self.call_once(&handle, tool_name, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(McpError::Unauthorized { .. }) => {
                self.retry_after_refresh(mcp_name, &handle, oauth.as_deref(), tool_name, arguments)
                    .await
            }
            Err(e) => {
                let message = e.to_string();
                self.set_status(
                    mcp_name,
                    McpServerStatus::Failed {
                        error: message.clone(),
                    },
                )
                .await;
                Err(McpError::transport(mcp_name, message))
            }
        }
    }

    /// Refresh the token and retry the call exactly once.
    async fn retry_after_refresh(
        &self,
        mcp_name: &str,
        handle: &TransportHandle,
        oauth: Option<&OAuthProvider>,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> McpResult<ToolCallResult> {
        let refreshed = match oauth {
            Some(provider) => provider.refresh().await,
            None => Err(McpError::Unauthorized {
                www_authenticate: None,
            }),
        };

        let token = match refreshed {
            Ok(token) => token,
            Err(_) => {
                self.set_status(mcp_name, McpServerStatus::NeedsAuth).await;
                return Err(McpError::AuthRequired(mcp_name.to_string()));
            }
        };

        if let TransportHandle::Http(http) = handle {
            http.set_auth_token(Some(token)).await;
        }

        match self.call_once(handle, tool_name, arguments).await {
            Ok(result) => Ok(result),
            Err(McpError::Unauthorized { .. }) => {
                // Second consecutive 401 after a refresh.
                self.set_status(mcp_name, McpServerStatus::NeedsAuth).await;
                Err(McpError::AuthRequired(mcp_name.to_string()))
            }
            Err(e) => Err(McpError::transport(mcp_name, e.to_string())),
        }
    }

    async fn call_once(
        &self,
        handle: &TransportHandle,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> McpResult<ToolCallResult> {
        let params = CallToolParams {
            name: tool_name.to_string(),
            arguments: Some(arguments),
        };
        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "tools/call",
            Some(serde_json::to_value(&params)?),
        );
        let response = handle.as_dyn().request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::ToolError(error.message));
        }
        serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol("Missing tools/call result"))?,
        )
        .map_err(|e| McpError::protocol(e.to_string()))
    }

    /// Drive the interactive OAuth flow for a server, then reconnect.
    pub async fn authenticate<F>(&self, name: &str, on_redirect: F) -> McpResult<McpServerStatus>
    where
        F: FnOnce(String),
    {
        let oauth = {
            let connections = self.connections.read().await;
            let conn = connections
                .get(name)
                .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
            conn.oauth
                .clone()
                .ok_or_else(|| McpError::transport(name, "server has no OAuth configuration"))?
        };

        oauth.authenticate(on_redirect).await?;
        Ok(self.connect(name).await)
    }

    /// Purge stored tokens and client registration for a server.
    pub async fn remove_auth(&self, name: &str) -> McpResult<()> {
        let oauth = {
            let connections = self.connections.read().await;
            let conn = connections
                .get(name)
                .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
            conn.oauth.clone()
        };
        if let Some(provider) = oauth {
            provider.remove_auth().await?;
        }
        Ok(())
    }

    /// Whether tokens (fresh or stale) are stored for a server.
    pub async fn has_stored_tokens(&self, name: &str) -> McpResult<bool> {
        let oauth = {
            let connections = self.connections.read().await;
            let conn = connections
                .get(name)
                .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
            conn.oauth.clone()
        };
        match oauth {
            Some(provider) => provider.has_stored_tokens().await,
            None => Ok(false),
        }
    }

    /// Close all connections.
    pub async fn shutdown(&self) {
        let mut connections = self.connections.write().await;
        for (name, conn) in connections.iter_mut() {
            if let Some(handle) = conn.transport.take() {
                if let Err(e) = handle.as_dyn().close().await {
                    warn!(server = %name, error = %e, "Error closing MCP connection");
                }
            }
        }
    }

    async fn set_status(&self, name: &str, status: McpServerStatus) {
        {
            let mut connections = self.connections.write().await;
            if let Some(conn) = connections.get_mut(name) {
                if conn.status == status {
                    return;
                }
                conn.status = status.clone();
            } else {
                return;
            }
        }
        self.publish_status(name, status);
    }

    fn publish_status(&self, name: &str, status: McpServerStatus) {
        self.bus.publish(McpStatusChanged {
            name: name.to_string(),
            status,
        });
    }
}

/// Map a connect-time error onto the status model.
fn classify_connect_error(error: &McpError) -> McpServerStatus {
    match error {
        McpError::Unauthorized { .. } | McpError::AuthRequired(_) => McpServerStatus::NeedsAuth,
        McpError::OAuth {
            stage: OAuthStage::Registration,
            message,
        } => McpServerStatus::NeedsClientRegistration {
            error: message.clone(),
        },
        other => McpServerStatus::Failed {
            error: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tidecode_core::config::McpOauthConfig;

    fn store() -> (Arc<McpAuthStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(McpAuthStore::with_path(dir.path().join("mcp-auth.json")));
        (store, dir)
    }

    fn remote_entry(url: &str, enabled: bool) -> McpEntryConfig {
        McpEntryConfig::Remote {
            url: url.to_string(),
            enabled,
            oauth: McpOauthConfig::default(),
        }
    }

    fn manager(entries: HashMap<String, McpEntryConfig>) -> (McpManager, TempDir) {
        let (store, dir) = store();
        (McpManager::new(entries, store, Bus::new()), dir)
    }

    #[tokio::test]
    async fn test_disabled_entry_status() {
        let mut entries = HashMap::new();
        entries.insert("off".to_string(), remote_entry("https://example.com", false));
        let (manager, _dir) = manager(entries);

        manager.start().await;
        let status = manager.status().await;
        assert_eq!(status["off"], McpServerStatus::Disabled);
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_failed() {
        let mut entries = HashMap::new();
        entries.insert(
            "dead".to_string(),
            remote_entry("http://127.0.0.1:1", true),
        );
        let (manager, _dir) = manager(entries);

        manager.start().await;
        let status = manager.status().await;
        assert!(matches!(status["dead"], McpServerStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_tool_call_unknown_server() {
        let (manager, _dir) = manager(HashMap::new());
        let result = manager
            .tool_call("nope", "tool", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(McpError::ServerNotFound(_))));
    }

    #[tokio::test]
    async fn test_tool_call_disabled_server() {
        let mut entries = HashMap::new();
        entries.insert("off".to_string(), remote_entry("https://example.com", false));
        let (manager, _dir) = manager(entries);
        manager.start().await;

        let result = manager.tool_call("off", "tool", serde_json::json!({})).await;
        assert!(matches!(result, Err(McpError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_tools_empty_when_nothing_connected() {
        let mut entries = HashMap::new();
        entries.insert(
            "dead".to_string(),
            remote_entry("http://127.0.0.1:1", true),
        );
        let (manager, _dir) = manager(entries);
        manager.start().await;
        assert!(manager.tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_tool_prefix() {
        let mut entries = HashMap::new();
        entries.insert("ide".to_string(), remote_entry("http://127.0.0.1:1", true));
        entries.insert(
            "ide_extra".to_string(),
            remote_entry("http://127.0.0.1:1", true),
        );
        let (manager, _dir) = manager(entries);

        let resolved = manager.resolve_tool("ide_hover").await.unwrap();
        assert_eq!(resolved, ("ide".to_string(), "hover".to_string()));

        // The longest matching server name wins: this is ide_extra's
        // hover tool, never ide's "extra_hover".
        let resolved = manager.resolve_tool("ide_extra_hover").await.unwrap();
        assert_eq!(resolved, ("ide_extra".to_string(), "hover".to_string()));

        // A bare server name with no tool after it falls back to the
        // shorter prefix that yields a tool.
        let resolved = manager.resolve_tool("ide_extra").await.unwrap();
        assert_eq!(resolved, ("ide".to_string(), "extra".to_string()));

        assert!(manager.resolve_tool("unknown_tool").await.is_none());
        assert!(manager.resolve_tool("ide").await.is_none());
    }

    #[tokio::test]
    async fn test_has_stored_tokens_no_oauth() {
        let mut entries = HashMap::new();
        entries.insert(
            "local".to_string(),
            McpEntryConfig::Local {
                command: vec!["echo".to_string()],
                environment: HashMap::new(),
                enabled: false,
            },
        );
        let (manager, _dir) = manager(entries);
        assert!(!manager.has_stored_tokens("local").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_auth_unknown_server() {
        let (manager, _dir) = manager(HashMap::new());
        assert!(matches!(
            manager.remove_auth("nope").await,
            Err(McpError::ServerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_oauth_disabled_entry_has_no_provider() {
        let mut entries = HashMap::new();
        entries.insert(
            "noauth".to_string(),
            McpEntryConfig::Remote {
                url: "https://example.com".to_string(),
                enabled: true,
                oauth: McpOauthConfig::Flag(false),
            },
        );
        let (manager, _dir) = manager(entries);

        let result = manager.authenticate("noauth", |_| {}).await;
        assert!(matches!(result, Err(McpError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_status_event_published() {
        let bus = Bus::new();
        let mut rx = bus.subscribe::<McpStatusChanged>();

        let (store, _dir) = store();
        let mut entries = HashMap::new();
        entries.insert(
            "dead".to_string(),
            remote_entry("http://127.0.0.1:1", true),
        );
        let manager = McpManager::new(entries, store, bus);
        manager.start().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "dead");
        assert!(matches!(event.status, McpServerStatus::Failed { .. }));
    }

    #[test]
    fn test_classify_connect_error() {
        assert_eq!(
            classify_connect_error(&McpError::Unauthorized {
                www_authenticate: Some("Bearer".to_string())
            }),
            McpServerStatus::NeedsAuth
        );
        assert!(matches!(
            classify_connect_error(&McpError::oauth(OAuthStage::Registration, "nope")),
            McpServerStatus::NeedsClientRegistration { .. }
        ));
        assert!(matches!(
            classify_connect_error(&McpError::Timeout),
            McpServerStatus::Failed { .. }
        ));
    }
}
