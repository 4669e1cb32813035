//! MCP credential store.
//!
//! One JSON document maps configured MCP server name to its auth record:
//!
//! ```json
//! { "linear": {
//!     "tokens": {"accessToken":"…","refreshToken":"…","expiresAt":1730000000},
//!     "clientInfo": {"clientId":"…","clientSecret":"…","clientSecretExpiresAt":0},
//!     "codeVerifier": "…"
//! } }
//! ```
//!
//! All fields are optional and unknown keys survive rewrites. The PKCE
//! `codeVerifier` is present only between authorization-URL emission and
//! token exchange.

use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// OAuth tokens as persisted on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds at which the access token expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl StoredTokens {
    /// Whether the access token is still fresh, with a safety margin.
    pub fn is_fresh(&self, now: u64) -> bool {
        match self.expires_at {
            // Expired when less than 60 seconds remain.
            Some(expires_at) => expires_at > now + 60,
            None => true,
        }
    }
}

/// Dynamic-registration client info as persisted on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredClientInfo {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// The per-server auth record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpAuthRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<StoredTokens>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_info: Option<StoredClientInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl McpAuthRecord {
    /// Whether the record carries any credentials worth keeping.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_none()
            && self.client_info.is_none()
            && self.code_verifier.is_none()
            && self.extra.is_empty()
    }
}

/// Durable key-value map: MCP server name → auth record.
///
/// Writes are atomic (write-to-temp + rename) and serialized per process.
/// Reads may race with writes but observe some committed version.
pub struct McpAuthStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl McpAuthStore {
    /// Create a store at the default path (`<data-dir>/mcp-auth.json`).
    pub fn new() -> AuthResult<Self> {
        let path = tidecode_util::path::mcp_auth_path().ok_or(AuthError::NoDataDir)?;
        Ok(Self::with_path(path))
    }

    /// Create a store with a custom path (tests, custom setups).
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Get the path to the store document.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get the auth record for a server. Absence means "no credentials".
    pub async fn get(&self, name: &str) -> AuthResult<Option<McpAuthRecord>> {
        let all = self.all().await?;
        Ok(all.get(name).cloned())
    }

    /// Replace the auth record for a server.
    pub async fn set(&self, name: &str, record: McpAuthRecord) -> AuthResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(name.to_string(), record);
        self.write_all(&all).await
    }

    /// Apply an edit to a server's record (created as empty if absent).
    pub async fn update<F>(&self, name: &str, editor: F) -> AuthResult<McpAuthRecord>
    where
        F: FnOnce(&mut McpAuthRecord),
    {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        let record = all.entry(name.to_string()).or_default();
        editor(record);
        let updated = record.clone();
        self.write_all(&all).await?;
        Ok(updated)
    }

    /// Remove a server's record entirely.
    pub async fn remove(&self, name: &str) -> AuthResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        let existed = all.remove(name).is_some();
        if existed {
            self.write_all(&all).await?;
        }
        Ok(existed)
    }

    /// All stored records.
    pub async fn all(&self) -> AuthResult<HashMap<String, McpAuthRecord>> {
        self.read_all().await
    }

    async fn read_all(&self) -> AuthResult<HashMap<String, McpAuthRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(AuthError::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        // Parse entry-by-entry so one bad record does not poison the rest.
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;
        let mut result = HashMap::new();
        for (name, value) in raw {
            match serde_json::from_value::<McpAuthRecord>(value) {
                Ok(record) => {
                    result.insert(name, record);
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Skipping invalid MCP auth entry");
                }
            }
        }
        Ok(result)
    }

    async fn write_all(&self, data: &HashMap<String, McpAuthRecord>) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;

        // Atomic replace: write to a temp file, then rename into place.
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&temp_path, perms)
                .await
                .map_err(|e| {
                    AuthError::Permissions(format!(
                        "Failed to set permissions on {:?}: {}",
                        temp_path, e
                    ))
                })?;
        }

        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!(path = ?self.path, "Wrote MCP auth store");
        Ok(())
    }
}

impl std::fmt::Debug for McpAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpAuthStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (McpAuthStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp-auth.json");
        (McpAuthStore::with_path(path), dir)
    }

    fn tokens(access: &str) -> StoredTokens {
        StoredTokens {
            access_token: access.to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(1_730_000_000),
            extra: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let (store, _dir) = test_store();

        let record = McpAuthRecord {
            tokens: Some(tokens("access123")),
            ..Default::default()
        };
        store.set("serverA", record.clone()).await.unwrap();

        let retrieved = store.get("serverA").await.unwrap();
        assert_eq!(retrieved, Some(record));
    }

    #[tokio::test]
    async fn test_remove_clears_record() {
        let (store, _dir) = test_store();

        store
            .set(
                "serverA",
                McpAuthRecord {
                    tokens: Some(tokens("a")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(store.remove("serverA").await.unwrap());
        assert_eq!(store.get("serverA").await.unwrap(), None);
        assert!(!store.remove("serverA").await.unwrap());
    }

    #[tokio::test]
    async fn test_logout_leaves_other_servers() {
        let (store, _dir) = test_store();

        store
            .set(
                "serverA",
                McpAuthRecord {
                    tokens: Some(tokens("a")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .set(
                "serverB",
                McpAuthRecord {
                    tokens: Some(tokens("b")),
                    client_info: Some(StoredClientInfo {
                        client_id: "client-b".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store.remove("serverA").await.unwrap();

        // Reload from disk: exactly serverB remains, untouched.
        let reloaded = McpAuthStore::with_path(store.path().clone());
        let all = reloaded.all().await.unwrap();
        assert_eq!(all.len(), 1);
        let b = &all["serverB"];
        assert_eq!(b.tokens.as_ref().unwrap().access_token, "b");
        assert_eq!(b.client_info.as_ref().unwrap().client_id, "client-b");
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let (store, _dir) = test_store();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_creates_record() {
        let (store, _dir) = test_store();

        store
            .update("serverA", |record| {
                record.code_verifier = Some("verifier".to_string());
            })
            .await
            .unwrap();

        let record = store.get("serverA").await.unwrap().unwrap();
        assert_eq!(record.code_verifier.as_deref(), Some("verifier"));
        assert!(record.tokens.is_none());
    }

    #[tokio::test]
    async fn test_unknown_keys_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp-auth.json");
        tokio::fs::write(
            &path,
            r#"{
                "serverA": {
                    "tokens": {"accessToken": "a", "futureField": 7},
                    "futureTopLevel": {"nested": true}
                }
            }"#,
        )
        .await
        .unwrap();

        let store = McpAuthStore::with_path(path.clone());
        // Touch an unrelated server so the file is rewritten.
        store
            .set("serverB", McpAuthRecord::default())
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("futureField"));
        assert!(content.contains("futureTopLevel"));
    }

    #[tokio::test]
    async fn test_invalid_entry_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp-auth.json");
        tokio::fs::write(
            &path,
            r#"{
                "good": {"tokens": {"accessToken": "a"}},
                "bad": "not an object"
            }"#,
        )
        .await
        .unwrap();

        let store = McpAuthStore::with_path(path);
        let all = store.all().await.unwrap();
        assert!(all.contains_key("good"));
        assert!(!all.contains_key("bad"));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let (store, _dir) = test_store();
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_format_camel_case() {
        let (store, _dir) = test_store();

        store
            .set(
                "serverA",
                McpAuthRecord {
                    tokens: Some(tokens("a")),
                    client_info: Some(StoredClientInfo {
                        client_id: "cid".to_string(),
                        client_secret: Some("sec".to_string()),
                        client_secret_expires_at: Some(0),
                        extra: HashMap::new(),
                    }),
                    code_verifier: Some("v".to_string()),
                    extra: HashMap::new(),
                },
            )
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(content.contains("accessToken"));
        assert!(content.contains("refreshToken"));
        assert!(content.contains("expiresAt"));
        assert!(content.contains("clientInfo"));
        assert!(content.contains("clientSecretExpiresAt"));
        assert!(content.contains("codeVerifier"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _dir) = test_store();
        store
            .set("serverA", McpAuthRecord::default())
            .await
            .unwrap();

        let mode = std::fs::metadata(store.path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_token_freshness() {
        let now = 1_000_000;
        let fresh = StoredTokens {
            access_token: "a".to_string(),
            expires_at: Some(now + 3600),
            ..Default::default()
        };
        assert!(fresh.is_fresh(now));

        let nearly_expired = StoredTokens {
            access_token: "a".to_string(),
            expires_at: Some(now + 30),
            ..Default::default()
        };
        assert!(!nearly_expired.is_fresh(now));

        let no_expiry = StoredTokens {
            access_token: "a".to_string(),
            ..Default::default()
        };
        assert!(no_expiry.is_fresh(now));
    }

    #[test]
    fn test_record_is_empty() {
        assert!(McpAuthRecord::default().is_empty());
        let record = McpAuthRecord {
            code_verifier: Some("v".to_string()),
            ..Default::default()
        };
        assert!(!record.is_empty());
    }
}
