//! Streamable HTTP transport for remote MCP servers.
//!
//! Requests go out as HTTP POST; the server answers with plain JSON or a
//! `text/event-stream` body carrying the JSON-RPC response.

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Streamable HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct StreamableHttpConfig {
    /// The server URL (e.g. `https://mcp.example.com/mcp`).
    pub url: String,
    /// Optional bearer token.
    pub auth_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for StreamableHttpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            timeout_secs: 60,
        }
    }
}

/// Streamable HTTP transport.
pub struct StreamableHttpTransport {
    url: String,
    client: Client,
    /// Bearer token; replaced after a refresh without rebuilding the transport.
    auth_token: RwLock<Option<String>>,
    connected: AtomicBool,
    /// Session id handed out by the server, echoed back on later requests.
    session_id: RwLock<Option<String>>,
}

impl StreamableHttpTransport {
    /// Create a new transport.
    pub fn new(config: StreamableHttpConfig) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(McpError::Http)?;

        Ok(Self {
            url: config.url,
            client,
            auth_token: RwLock::new(config.auth_token),
            connected: AtomicBool::new(false),
            session_id: RwLock::new(None),
        })
    }

    /// Replace the bearer token (after a refresh or a fresh auth flow).
    pub async fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().await = token;
    }

    async fn build_request(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);

        if let Some(ref token) = *self.auth_token.read().await {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(ref session) = *self.session_id.read().await {
            req = req.header("Mcp-Session-Id", session.clone());
        }

        req
    }

    async fn parse_response(&self, response: reqwest::Response) -> McpResult<JsonRpcResponse> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            let www_authenticate = response
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            return Err(McpError::Unauthorized { www_authenticate });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::protocol(format!(
                "Server returned {status}: {text}"
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            self.parse_sse_stream(response).await
        } else {
            let text = response.text().await.map_err(McpError::Http)?;
            serde_json::from_str(&text)
                .map_err(|e| McpError::protocol(format!("Invalid JSON response: {e}")))
        }
    }

    /// Scan an SSE body for the first JSON-RPC response event.
    async fn parse_sse_stream(&self, response: reqwest::Response) -> McpResult<JsonRpcResponse> {
        use futures::StreamExt;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk =
                chunk_result.map_err(|e| McpError::protocol(format!("Stream error: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            for line in buffer.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data) {
                        return Ok(response);
                    }
                }
            }

            // Keep only the incomplete tail.
            if let Some(last_newline) = buffer.rfind('\n') {
                buffer = buffer[last_newline + 1..].to_string();
            }
        }

        Err(McpError::protocol("SSE stream ended without response"))
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let body = serde_json::to_string(&request)?;
        debug!(id = request.id, method = %request.method, "Sending MCP request");

        let response = self
            .build_request(body)
            .await
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpError::Timeout
                } else {
                    McpError::Http(e)
                }
            })?;

        if let Some(session_id) = response.headers().get("mcp-session-id") {
            if let Ok(id) = session_id.to_str() {
                *self.session_id.write().await = Some(id.to_string());
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        self.parse_response(response).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let body = serde_json::to_string(&notification)?;
        debug!(method = %notification.method, "Sending MCP notification");

        let response = self.build_request(body).await.send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification returned non-success status");
        }

        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        debug!("Closed streamable HTTP transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
