//! Loopback OAuth callback listener.
//!
//! A transient HTTP listener bound to `127.0.0.1:0` for the duration of
//! one authorization flow. The ephemeral port appears verbatim in the
//! redirect URI handed to the authorization server. The listener answers
//! the browser with a static HTML page and shuts down after the matching
//! callback arrives or the flow times out.

use crate::error::{McpError, McpResult, OAuthStage};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Path registered in the redirect URI.
pub const CALLBACK_PATH: &str = "/callback";

/// How long to wait for the user to complete authorization.
pub const CALLBACK_TIMEOUT_SECS: u64 = 5 * 60;

/// HTML response for successful authorization.
const HTML_SUCCESS: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>tidecode - Authorization Successful</title>
  <style>
    body { font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #10141c; color: #eee; }
    .container { text-align: center; padding: 2rem; }
    h1 { color: #4ade80; margin-bottom: 1rem; }
    p { color: #aaa; }
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Successful</h1>
    <p>You can close this window and return to tidecode.</p>
  </div>
  <script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#;

/// HTML response for failed authorization.
fn html_error(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>tidecode - Authorization Failed</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #10141c; color: #eee; }}
    .container {{ text-align: center; padding: 2rem; }}
    h1 {{ color: #f87171; margin-bottom: 1rem; }}
    p {{ color: #aaa; }}
    .error {{ color: #fca5a5; font-family: monospace; margin-top: 1rem; padding: 1rem; background: rgba(248,113,113,0.1); border-radius: 0.5rem; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Failed</h1>
    <p>An error occurred during authorization.</p>
    <div class="error">{}</div>
  </div>
</body>
</html>"#,
        html_escape(error)
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Build an HTTP response.
fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Unknown",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    )
}

/// Outcome of a single handled connection.
enum CallbackOutcome {
    /// Authorization code received with the expected state.
    Code(String),
    /// The authorization server reported an error (user denied, etc).
    Denied(String),
    /// Unrelated request (favicon, wrong state); keep listening.
    Ignored,
}

/// The transient loopback listener for one OAuth flow.
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    /// Bind to an ephemeral loopback port.
    pub async fn bind() -> McpResult<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            McpError::oauth(OAuthStage::Redirect, format!("Failed to bind listener: {e}"))
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| McpError::oauth(OAuthStage::Redirect, e.to_string()))?
            .port();

        debug!(port, "OAuth callback listener bound");
        Ok(Self { listener, port })
    }

    /// The bound ephemeral port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI to register with the authorization server.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, CALLBACK_PATH)
    }

    /// Wait for the callback carrying `expected_state`.
    ///
    /// Stray requests (favicon probes, mismatched state) are answered and
    /// ignored; the listener keeps waiting until the matching callback or
    /// the 5-minute timeout.
    pub async fn wait_for_code(self, expected_state: &str) -> McpResult<String> {
        let timeout = std::time::Duration::from_secs(CALLBACK_TIMEOUT_SECS);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let accept = tokio::time::timeout_at(deadline, self.listener.accept()).await;
            let (stream, _) = match accept {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    warn!(error = %e, "Error accepting OAuth callback connection");
                    continue;
                }
                Err(_) => {
                    return Err(McpError::oauth(
                        OAuthStage::Redirect,
                        "Callback timeout - authorization took too long",
                    ));
                }
            };

            match handle_connection(stream, expected_state).await {
                Ok(CallbackOutcome::Code(code)) => return Ok(code),
                Ok(CallbackOutcome::Denied(error)) => {
                    return Err(McpError::oauth(OAuthStage::Redirect, error));
                }
                Ok(CallbackOutcome::Ignored) => continue,
                Err(e) => {
                    warn!(error = %e, "Error handling OAuth callback");
                    continue;
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    expected_state: &str,
) -> McpResult<CallbackOutcome> {
    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    if parts.len() < 2 {
        let response = http_response(400, "text/plain", "Bad Request");
        stream.write_all(response.as_bytes()).await.ok();
        return Ok(CallbackOutcome::Ignored);
    }

    let path = parts[1];
    let url = format!("http://127.0.0.1{path}");
    let parsed = match url::Url::parse(&url) {
        Ok(u) => u,
        Err(_) => {
            let response = http_response(400, "text/plain", "Invalid URL");
            stream.write_all(response.as_bytes()).await.ok();
            return Ok(CallbackOutcome::Ignored);
        }
    };

    if parsed.path() != CALLBACK_PATH {
        let response = http_response(404, "text/plain", "Not Found");
        stream.write_all(response.as_bytes()).await.ok();
        return Ok(CallbackOutcome::Ignored);
    }

    let params: HashMap<String, String> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    debug!(
        has_code = params.contains_key("code"),
        has_error = params.contains_key("error"),
        "Received OAuth callback"
    );

    // State must match; anything else could be a CSRF attempt.
    if params.get("state").map(String::as_str) != Some(expected_state) {
        let html = html_error("Invalid or missing state parameter");
        let response = http_response(400, "text/html", &html);
        stream.write_all(response.as_bytes()).await.ok();
        return Ok(CallbackOutcome::Ignored);
    }

    if let Some(error) = params.get("error") {
        let message = params
            .get("error_description")
            .cloned()
            .unwrap_or_else(|| error.clone());
        let html = html_error(&message);
        let response = http_response(200, "text/html", &html);
        stream.write_all(response.as_bytes()).await.ok();
        return Ok(CallbackOutcome::Denied(message));
    }

    match params.get("code") {
        Some(code) => {
            let response = http_response(200, "text/html", HTML_SUCCESS);
            stream.write_all(response.as_bytes()).await.ok();
            Ok(CallbackOutcome::Code(code.clone()))
        }
        None => {
            let html = html_error("No authorization code provided");
            let response = http_response(400, "text/html", &html);
            stream.write_all(response.as_bytes()).await.ok();
            Ok(CallbackOutcome::Ignored)
        }
    }
}
