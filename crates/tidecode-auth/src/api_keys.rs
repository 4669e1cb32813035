//! Provider API key storage.
//!
//! Keys recorded by the auth command land in `auth.json`, keyed by
//! provider id. During registry construction a stored key marks the
//! provider's credential source as `api`.

use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Authentication information for a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthInfo {
    /// API key authentication.
    Api {
        /// The API key.
        key: String,
    },
}

impl AuthInfo {
    /// Create a new API key auth info.
    pub fn api_key(key: String) -> Self {
        Self::Api { key }
    }

    /// Get the API key.
    pub fn as_api_key(&self) -> Option<&str> {
        match self {
            Self::Api { key } => Some(key),
        }
    }
}

/// Storage for provider API keys with restrictive file permissions.
pub struct ApiKeyStore {
    path: PathBuf,
    /// In-memory cache of auth data.
    cache: RwLock<Option<HashMap<String, AuthInfo>>>,
}

impl ApiKeyStore {
    /// Create a store at the default path (`<data-dir>/auth.json`).
    pub fn new() -> AuthResult<Self> {
        let path = tidecode_util::path::api_key_path().ok_or(AuthError::NoDataDir)?;
        Ok(Self::with_path(path))
    }

    /// Create a store with a custom path.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            cache: RwLock::new(None),
        }
    }

    /// Get the path to the auth file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get auth info for a provider.
    pub async fn get(&self, provider: &str) -> AuthResult<Option<AuthInfo>> {
        let all = self.all().await?;
        Ok(all.get(provider).cloned())
    }

    /// Set auth info for a provider.
    pub async fn set(&self, provider: &str, info: AuthInfo) -> AuthResult<()> {
        debug!(provider = %provider, "Setting auth");

        let mut all = self.all().await?;
        all.insert(provider.to_string(), info);
        self.write_all(&all).await?;
        *self.cache.write().await = None;
        Ok(())
    }

    /// Remove auth for a provider. Returns whether it existed.
    pub async fn remove(&self, provider: &str) -> AuthResult<bool> {
        debug!(provider = %provider, "Removing auth");

        let mut all = self.all().await?;
        let existed = all.remove(provider).is_some();
        if existed {
            self.write_all(&all).await?;
            *self.cache.write().await = None;
        }
        Ok(existed)
    }

    /// All stored auth info.
    pub async fn all(&self) -> AuthResult<HashMap<String, AuthInfo>> {
        {
            let cache = self.cache.read().await;
            if let Some(data) = &*cache {
                return Ok(data.clone());
            }
        }

        let data = self.read_all().await?;
        *self.cache.write().await = Some(data.clone());
        Ok(data)
    }

    /// Check if a provider has stored auth.
    pub async fn has(&self, provider: &str) -> AuthResult<bool> {
        Ok(self.all().await?.contains_key(provider))
    }

    async fn read_all(&self) -> AuthResult<HashMap<String, AuthInfo>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(AuthError::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;
        let mut result = HashMap::new();
        for (key, value) in raw {
            match serde_json::from_value::<AuthInfo>(value) {
                Ok(info) => {
                    result.insert(key, info);
                }
                Err(e) => {
                    warn!(provider = %key, error = %e, "Skipping invalid auth entry");
                }
            }
        }
        Ok(result)
    }

    async fn write_all(&self, data: &HashMap<String, AuthInfo>) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;
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
        debug!(path = ?self.path, "Wrote auth file");
        Ok(())
    }
}

impl std::fmt::Debug for ApiKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (ApiKeyStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        (ApiKeyStore::with_path(path), dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _dir) = test_store();

        let auth = AuthInfo::api_key("sk-test-key".to_string());
        store.set("anthropic", auth.clone()).await.unwrap();

        let retrieved = store.get("anthropic").await.unwrap();
        assert_eq!(retrieved, Some(auth));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _dir) = test_store();
        assert_eq!(store.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, _dir) = test_store();

        store
            .set("anthropic", AuthInfo::api_key("key".to_string()))
            .await
            .unwrap();
        assert!(store.remove("anthropic").await.unwrap());
        assert_eq!(store.get("anthropic").await.unwrap(), None);
        assert!(!store.remove("anthropic").await.unwrap());
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");

        {
            let store = ApiKeyStore::with_path(path.clone());
            store
                .set("openai", AuthInfo::api_key("key".to_string()))
                .await
                .unwrap();
        }

        let store = ApiKeyStore::with_path(path);
        let auth = store.get("openai").await.unwrap();
        assert_eq!(auth, Some(AuthInfo::api_key("key".to_string())));
    }

    #[tokio::test]
    async fn test_invalid_entry_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        tokio::fs::write(
            &path,
            r#"{
                "valid": {"type": "api", "key": "sk-valid"},
                "invalid": {"type": "unknown", "foo": "bar"}
            }"#,
        )
        .await
        .unwrap();

        let store = ApiKeyStore::with_path(path);
        let all = store.all().await.unwrap();
        assert!(all.contains_key("valid"));
        assert!(!all.contains_key("invalid"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _dir) = test_store();
        store
            .set("test", AuthInfo::api_key("key".to_string()))
            .await
            .unwrap();

        let mode = std::fs::metadata(store.path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
