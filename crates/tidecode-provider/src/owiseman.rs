//! Owiseman gateway driver and model discovery.
//!
//! Owiseman speaks the OpenAI dialect with two quirks: requests must
//! carry both `Authorization: Bearer` and `api-key` headers, and the
//! chat route lives under `/v1/chat/completions` regardless of how the
//! base URL is spelled. Discovery enumerates `GET /v1/models` keyed by
//! OpenAI-style `data[].id`.

use crate::error::{ProviderError, ProviderResult};
use crate::message::Message;
use crate::model::{ModelInfo, Provider};
use crate::openai_compatible::OpenAiCompatibleModel;
use crate::registry::ProviderLoader;
use crate::stream::StreamPart;
use crate::{GenerateOptions, GenerateResult, LanguageModel};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Discovery probe timeout.
const DISCOVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(2500);

/// Rewrite a chat URL onto the `/v1` route Owiseman requires.
fn rewrite_chat_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    // Collapse an existing /chat/completions (or /v1 suffix) first.
    let base = base
        .strip_suffix("/chat/completions")
        .unwrap_or(base)
        .trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{base}/v1/chat/completions")
}

/// Owiseman gateway driver.
pub struct OwisemanModel {
    inner: OpenAiCompatibleModel,
    provider_id: String,
}

impl OwisemanModel {
    /// Construct for a `(provider, model)` pair.
    pub fn new(provider: &Provider, model: &ModelInfo) -> ProviderResult<Self> {
        let base_url = provider
            .base_url
            .clone()
            .ok_or_else(|| ProviderError::provider_init(&provider.id, "missing base URL"))?;
        let api_key = provider
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::MissingApiKey(provider.id.clone()))?;

        let chat_url = rewrite_chat_url(&base_url);
        let mut extra_headers = HashMap::new();
        extra_headers.insert("api-key".to_string(), api_key);

        let inner = OpenAiCompatibleModel::with_overrides(provider, model, chat_url, extra_headers)?;
        Ok(Self {
            inner,
            provider_id: provider.id.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for OwisemanModel {
    async fn generate(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<GenerateResult> {
        self.inner.generate(prompt, options).await
    }

    async fn stream(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, StreamPart>> {
        self.inner.stream(prompt, options).await
    }

    fn model_info(&self) -> &ModelInfo {
        self.inner.model_info()
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// `/v1/models` response shape.
#[derive(serde::Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(serde::Deserialize)]
struct ModelEntry {
    id: String,
}

fn synthesize_model(provider: &Provider, id: &str) -> ModelInfo {
    let mut model = provider
        .models
        .values()
        .next()
        .cloned()
        .unwrap_or_else(|| {
            let mut fallback = ModelInfo::new(id, &provider.id);
            fallback.limit.context = 128_000;
            fallback.limit.output = 16_384;
            fallback
        });
    model.id = id.to_string();
    model.api_id = id.to_string();
    model.name = id.to_string();
    model.provider_id = provider.id.clone();
    model
}

/// Registry loader: enumerate gateway models at build time.
pub struct OwisemanLoader;

#[async_trait]
impl ProviderLoader for OwisemanLoader {
    fn provider_id(&self) -> &str {
        "owiseman"
    }

    fn autoload(
        &self,
        _provider: &Provider,
        configured: bool,
        env: &HashMap<String, String>,
    ) -> bool {
        configured || env.contains_key("OWISEMAN_API_KEY")
    }

    async fn load(
        &self,
        provider: &mut Provider,
        env: &HashMap<String, String>,
    ) -> ProviderResult<()> {
        let Some(api_key) = provider
            .api_key
            .clone()
            .or_else(|| env.get("OWISEMAN_API_KEY").cloned())
        else {
            return Ok(());
        };
        let Some(base_url) = provider
            .base_url
            .clone()
            .or_else(|| env.get("OWISEMAN_BASE_URL").cloned())
        else {
            debug!("Owiseman base URL unset, skipping discovery");
            return Ok(());
        };

        let models_url = format!("{}/v1/models", base_url.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::provider_init(&provider.id, e.to_string()))?;

        let response = client
            .get(&models_url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("api-key", api_key.clone())
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                let models: ModelsResponse = response.json().await?;
                debug!(count = models.data.len(), "Discovered Owiseman models");
                for entry in models.data {
                    if !provider.models.contains_key(&entry.id) {
                        let model = synthesize_model(provider, &entry.id);
                        provider.models.insert(entry.id, model);
                    }
                }
            }
            Ok(response) => {
                warn!(status = %response.status(), "Owiseman discovery rejected");
            }
            Err(e) => {
                warn!(url = %models_url, error = %e, "Owiseman discovery failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    #[test]
    fn test_rewrite_chat_url() {
        assert_eq!(
            rewrite_chat_url("https://gw.example.com"),
            "https://gw.example.com/v1/chat/completions"
        );
        assert_eq!(
            rewrite_chat_url("https://gw.example.com/"),
            "https://gw.example.com/v1/chat/completions"
        );
        // A base already pointing at /chat/completions is rewritten.
        assert_eq!(
            rewrite_chat_url("https://gw.example.com/chat/completions"),
            "https://gw.example.com/v1/chat/completions"
        );
        // A /v1 base doesn't double up.
        assert_eq!(
            rewrite_chat_url("https://gw.example.com/v1"),
            "https://gw.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_new_requires_credentials() {
        let mut provider = catalog::bundled().remove("owiseman").unwrap();
        let model = ModelInfo::new("m", "owiseman");

        assert!(OwisemanModel::new(&provider, &model).is_err());

        provider.base_url = Some("https://gw.example.com".to_string());
        assert!(matches!(
            OwisemanModel::new(&provider, &model),
            Err(ProviderError::MissingApiKey(_))
        ));

        provider.api_key = Some("k".to_string());
        assert!(OwisemanModel::new(&provider, &model).is_ok());
    }

    #[test]
    fn test_synthesize_model_defaults() {
        let provider = catalog::bundled().remove("owiseman").unwrap();
        let model = synthesize_model(&provider, "gpt-5-mini");
        assert_eq!(model.id, "gpt-5-mini");
        assert_eq!(model.provider_id, "owiseman");
        assert_eq!(model.limit.context, 128_000);
    }

    #[test]
    fn test_loader_autoload() {
        let provider = catalog::bundled().remove("owiseman").unwrap();
        let mut env = HashMap::new();
        assert!(!OwisemanLoader.autoload(&provider, false, &env));
        env.insert("OWISEMAN_API_KEY".to_string(), "k".to_string());
        assert!(OwisemanLoader.autoload(&provider, false, &env));
    }

    #[tokio::test]
    async fn test_loader_skips_without_key() {
        let mut provider = catalog::bundled().remove("owiseman").unwrap();
        OwisemanLoader
            .load(&mut provider, &HashMap::new())
            .await
            .unwrap();
        assert!(provider.models.is_empty());
    }

    #[tokio::test]
    async fn test_loader_tolerates_unreachable_endpoint() {
        let mut provider = catalog::bundled().remove("owiseman").unwrap();
        provider.api_key = Some("k".to_string());
        provider.base_url = Some("http://127.0.0.1:1".to_string());
        OwisemanLoader
            .load(&mut provider, &HashMap::new())
            .await
            .unwrap();
        assert!(provider.models.is_empty());
    }
}
