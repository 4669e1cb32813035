//! OAuth 2.1 support for remote MCP servers.
//!
//! Implements the authorization-code flow with PKCE (S256), including
//! authorization-server discovery (RFC 8414), protected-resource metadata
//! (RFC 9728) and dynamic client registration (RFC 7591). All durable
//! state (tokens, registered client, in-flight code verifier) lives in
//! the [`McpAuthStore`]; this type holds no credentials of its own.

use crate::callback::CallbackListener;
use crate::error::{McpError, McpResult, OAuthStage};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tidecode_auth::{McpAuthStore, StoredClientInfo, StoredTokens};
use tidecode_core::config::McpOauthSettings;
use tracing::{debug, info};

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ============================================================================
// PKCE
// ============================================================================

/// Generate a PKCE code verifier (43 chars of base64url entropy).
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Derive the S256 code challenge from a verifier.
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate the OAuth `state` parameter.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

// ============================================================================
// Discovery
// ============================================================================

/// Authorization-server metadata (RFC 8414).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Protected-resource metadata (RFC 9728).
#[derive(Debug, Clone, Deserialize)]
struct ProtectedResourceMetadata {
    #[serde(default)]
    authorization_servers: Vec<String>,
}

fn origin_of(server_url: &str) -> McpResult<String> {
    let parsed = url::Url::parse(server_url)
        .map_err(|e| McpError::oauth(OAuthStage::Discovery, format!("Invalid server URL: {e}")))?;
    Ok(parsed.origin().ascii_serialization())
}

/// Discover the authorization server for an MCP endpoint.
///
/// Tries `/.well-known/oauth-authorization-server` on the server origin
/// first, then falls back to the protected-resource metadata's
/// `authorization_servers` list.
pub async fn discover_metadata(
    client: &reqwest::Client,
    server_url: &str,
) -> McpResult<AuthServerMetadata> {
    let origin = origin_of(server_url)?;

    let as_url = format!("{origin}/.well-known/oauth-authorization-server");
    if let Some(metadata) = fetch_metadata(client, &as_url).await {
        return Ok(metadata);
    }

    let pr_url = format!("{origin}/.well-known/oauth-protected-resource");
    let resource: ProtectedResourceMetadata = client
        .get(&pr_url)
        .send()
        .await
        .map_err(|e| McpError::oauth(OAuthStage::Discovery, e.to_string()))?
        .error_for_status()
        .map_err(|e| McpError::oauth(OAuthStage::Discovery, e.to_string()))?
        .json()
        .await
        .map_err(|e| McpError::oauth(OAuthStage::Discovery, e.to_string()))?;

    for auth_server in &resource.authorization_servers {
        let base = auth_server.trim_end_matches('/');
        let url = format!("{base}/.well-known/oauth-authorization-server");
        if let Some(metadata) = fetch_metadata(client, &url).await {
            return Ok(metadata);
        }
    }

    Err(McpError::oauth(
        OAuthStage::Discovery,
        format!("No authorization server metadata found for {server_url}"),
    ))
}

async fn fetch_metadata(client: &reqwest::Client, url: &str) -> Option<AuthServerMetadata> {
    let response = client.get(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json().await.ok()
}

// ============================================================================
// Token endpoint
// ============================================================================

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    fn into_stored(self, previous_refresh: Option<String>) -> StoredTokens {
        StoredTokens {
            access_token: self.access_token,
            // Servers may omit the refresh token on refresh; keep the old one.
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self.expires_in.map(|secs| unix_now() + secs),
            extra: HashMap::new(),
        }
    }
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: Option<&str>,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> McpResult<TokenResponse> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client_id),
        ("code_verifier", code_verifier),
    ];
    if let Some(secret) = client_secret {
        params.push(("client_secret", secret));
    }

    let response = client
        .post(token_endpoint)
        .form(&params)
        .send()
        .await
        .map_err(|e| McpError::oauth(OAuthStage::Exchange, format!("Token request failed: {e}")))?;

    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(McpError::oauth(
            OAuthStage::Exchange,
            format!("Token exchange failed: {text}"),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| McpError::oauth(OAuthStage::Exchange, format!("Invalid token response: {e}")))
}

/// Refresh tokens using a refresh token.
///
/// A `400 invalid_grant` means the refresh token itself is dead and the
/// user has to re-run the auth flow; this is surfaced as
/// [`McpError::Unauthorized`] so the manager escalates to `needs_auth`.
pub async fn refresh_tokens(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> McpResult<TokenResponse> {
    let mut params = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];
    if let Some(secret) = client_secret {
        params.push(("client_secret", secret));
    }

    let response = client
        .post(token_endpoint)
        .form(&params)
        .send()
        .await
        .map_err(|e| McpError::oauth(OAuthStage::Refresh, format!("Refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST && text.contains("invalid_grant") {
            return Err(McpError::Unauthorized {
                www_authenticate: None,
            });
        }
        return Err(McpError::oauth(
            OAuthStage::Refresh,
            format!("Token refresh failed: {text}"),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| McpError::oauth(OAuthStage::Refresh, format!("Invalid refresh response: {e}")))
}

/// Build the authorization URL the user's browser is sent to.
pub fn build_auth_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: Option<&str>,
    state: &str,
    code_challenge: &str,
) -> String {
    let mut url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
        auth_endpoint,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
    );
    if let Some(scope) = scope {
        url.push_str(&format!("&scope={}", urlencoding::encode(scope)));
    }
    url
}

// ============================================================================
// Provider
// ============================================================================

/// Dynamic client registration response (RFC 7591).
#[derive(Debug, Clone, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    client_secret_expires_at: Option<u64>,
}

/// Per-server OAuth state machine driving the code + PKCE dance.
pub struct OAuthProvider {
    /// Configured MCP server name (the credential-store key).
    name: String,
    /// MCP server URL.
    server_url: String,
    /// Client credentials and scope from configuration, if any.
    settings: McpOauthSettings,
    store: Arc<McpAuthStore>,
    client: reqwest::Client,
}

impl OAuthProvider {
    /// Create a provider for one configured server.
    pub fn new(
        name: impl Into<String>,
        server_url: impl Into<String>,
        settings: McpOauthSettings,
        store: Arc<McpAuthStore>,
    ) -> Self {
        Self {
            name: name.into(),
            server_url: server_url.into(),
            settings,
            store,
            client: reqwest::Client::new(),
        }
    }

    /// The configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A fresh access token, if one is stored and not about to expire.
    pub async fn access_token(&self) -> McpResult<Option<String>> {
        let record = self.store.get(&self.name).await?;
        Ok(record
            .and_then(|r| r.tokens)
            .filter(|t| t.is_fresh(unix_now()))
            .map(|t| t.access_token))
    }

    /// Whether any tokens are stored at all, fresh or not.
    pub async fn has_stored_tokens(&self) -> McpResult<bool> {
        let record = self.store.get(&self.name).await?;
        Ok(record.and_then(|r| r.tokens).is_some())
    }

    /// Purge tokens and registered client info.
    ///
    /// The next call against the server falls back to config-provided
    /// credentials or goes out unauthenticated.
    pub async fn remove_auth(&self) -> McpResult<()> {
        self.store.remove(&self.name).await?;
        info!(mcp = %self.name, "Removed stored OAuth state");
        Ok(())
    }

    /// Resolve client info: configuration wins, then the stored
    /// dynamic registration (unless its secret has expired).
    async fn client_info(&self) -> McpResult<Option<StoredClientInfo>> {
        if let Some(ref client_id) = self.settings.client_id {
            return Ok(Some(StoredClientInfo {
                client_id: client_id.clone(),
                client_secret: self.settings.client_secret.clone(),
                client_secret_expires_at: None,
                extra: HashMap::new(),
            }));
        }

        let record = self.store.get(&self.name).await?;
        let info = match record.and_then(|r| r.client_info) {
            Some(info) => info,
            None => return Ok(None),
        };

        if let Some(expires_at) = info.client_secret_expires_at {
            // 0 means "never expires" per RFC 7591.
            if expires_at != 0 && expires_at < unix_now() {
                info!(mcp = %self.name, "Registered client secret expired");
                return Ok(None);
            }
        }
        Ok(Some(info))
    }

    /// Register a client dynamically (RFC 7591) and persist the result.
    async fn register_client(
        &self,
        metadata: &AuthServerMetadata,
        redirect_uri: &str,
    ) -> McpResult<StoredClientInfo> {
        let endpoint = metadata.registration_endpoint.as_ref().ok_or_else(|| {
            McpError::oauth(
                OAuthStage::Registration,
                format!(
                    "{} does not support dynamic client registration",
                    self.server_url
                ),
            )
        })?;

        let body = serde_json::json!({
            "redirect_uris": [redirect_uri],
            "client_name": "tidecode",
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        });

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| McpError::oauth(OAuthStage::Registration, e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::oauth(
                OAuthStage::Registration,
                format!("Registration rejected: {text}"),
            ));
        }

        let registered: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| McpError::oauth(OAuthStage::Registration, e.to_string()))?;

        let info = StoredClientInfo {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            client_secret_expires_at: registered.client_secret_expires_at,
            extra: HashMap::new(),
        };

        self.store
            .update(&self.name, |record| {
                record.client_info = Some(info.clone());
            })
            .await?;

        info!(mcp = %self.name, "Registered OAuth client dynamically");
        Ok(info)
    }

    /// Run the full authorization-code + PKCE flow.
    ///
    /// `on_redirect` receives the authorization URL to hand to the user
    /// (usually by opening a browser). Blocks until the loopback listener
    /// receives the callback or times out (5 minutes).
    pub async fn authenticate<F>(&self, on_redirect: F) -> McpResult<()>
    where
        F: FnOnce(String),
    {
        let metadata = discover_metadata(&self.client, &self.server_url).await?;

        // The listener is bound before registration so the ephemeral port
        // can appear verbatim in the registered redirect URI.
        let listener = CallbackListener::bind().await?;
        let redirect_uri = listener.redirect_uri();

        let client_info = match self.client_info().await? {
            Some(info) => info,
            None => self.register_client(&metadata, &redirect_uri).await?,
        };

        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        let state = generate_state();

        // The verifier lives in the store only until exchange completes.
        self.store
            .update(&self.name, |record| {
                record.code_verifier = Some(verifier.clone());
            })
            .await?;

        let auth_url = build_auth_url(
            &metadata.authorization_endpoint,
            &client_info.client_id,
            &redirect_uri,
            self.settings.scope.as_deref(),
            &state,
            &challenge,
        );

        debug!(mcp = %self.name, redirect_uri = %redirect_uri, "Starting OAuth flow");
        on_redirect(auth_url);

        let result = self.finish(listener, &metadata, &client_info, &state, &verifier).await;

        // Success or failure, the verifier never outlives the flow.
        self.store
            .update(&self.name, |record| {
                record.code_verifier = None;
            })
            .await?;

        result
    }

    async fn finish(
        &self,
        listener: CallbackListener,
        metadata: &AuthServerMetadata,
        client_info: &StoredClientInfo,
        state: &str,
        verifier: &str,
    ) -> McpResult<()> {
        let redirect_uri = listener.redirect_uri();
        let code = listener.wait_for_code(state).await?;

        let tokens = exchange_code(
            &self.client,
            &metadata.token_endpoint,
            &client_info.client_id,
            client_info.client_secret.as_deref(),
            &code,
            &redirect_uri,
            verifier,
        )
        .await?;

        self.store
            .update(&self.name, |record| {
                record.tokens = Some(tokens.clone().into_stored(None));
            })
            .await?;

        info!(mcp = %self.name, "OAuth flow complete, tokens persisted");
        Ok(())
    }

    /// Refresh the stored tokens. Used lazily when a request comes back 401.
    pub async fn refresh(&self) -> McpResult<String> {
        let record = self.store.get(&self.name).await?;
        let tokens = record
            .and_then(|r| r.tokens)
            .ok_or(McpError::Unauthorized {
                www_authenticate: None,
            })?;
        let refresh_token = tokens.refresh_token.clone().ok_or(McpError::Unauthorized {
            www_authenticate: None,
        })?;

        let client_info = self.client_info().await?.ok_or(McpError::Unauthorized {
            www_authenticate: None,
        })?;

        let metadata = discover_metadata(&self.client, &self.server_url).await?;

        let response = refresh_tokens(
            &self.client,
            &metadata.token_endpoint,
            &client_info.client_id,
            client_info.client_secret.as_deref(),
            &refresh_token,
        )
        .await?;

        let stored = response.into_stored(Some(refresh_token));
        let access = stored.access_token.clone();
        self.store
            .update(&self.name, |record| {
                record.tokens = Some(stored.clone());
            })
            .await?;

        debug!(mcp = %self.name, "Refreshed OAuth tokens");
        Ok(access)
    }
}
