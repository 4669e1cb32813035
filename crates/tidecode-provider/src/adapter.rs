//! Lazy construction and memoization of language-model handles.
//!
//! Backend dispatch is a closed sum over the known driver families plus
//! the OpenAI-compatible catch-all; exhaustiveness checking catches any
//! added family.

use crate::anthropic::AnthropicModel;
use crate::bedrock::BedrockModel;
use crate::catalog;
use crate::error::ProviderResult;
use crate::model::{ModelInfo, Provider};
use crate::ollama::OllamaModel;
use crate::openai_compatible::OpenAiCompatibleModel;
use crate::owiseman::OwisemanModel;
use crate::registry::deep_merge;
use crate::{GenerateOptions, SharedLanguageModel};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The known backend driver families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Anthropic,
    OpenAiCompatible,
    Bedrock,
    Ollama,
    Owiseman,
}

impl Backend {
    /// Resolve a driver family from a provider's `api` field. Unknown
    /// families fall through to the OpenAI-compatible catch-all.
    pub fn from_api(api: &str) -> Self {
        match api {
            catalog::API_ANTHROPIC => Backend::Anthropic,
            catalog::API_BEDROCK => Backend::Bedrock,
            catalog::API_OLLAMA => Backend::Ollama,
            catalog::API_OWISEMAN => Backend::Owiseman,
            _ => Backend::OpenAiCompatible,
        }
    }
}

/// Memoized `(provider, model, options)` → handle cache.
pub(crate) struct HandleCache {
    inner: RwLock<HashMap<String, SharedLanguageModel>>,
}

impl HandleCache {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn get_or_build(
        &self,
        provider: &Provider,
        model: &ModelInfo,
    ) -> ProviderResult<SharedLanguageModel> {
        let key = cache_key(provider, model);

        {
            let cache = self.inner.read().await;
            if let Some(handle) = cache.get(&key) {
                return Ok(handle.clone());
            }
        }

        debug!(provider = %provider.id, model = %model.id, "Constructing model handle");
        let handle = build_handle(provider, model)?;

        let mut cache = self.inner.write().await;
        // A racing builder may have won; first insert sticks.
        let handle = cache.entry(key).or_insert(handle).clone();
        Ok(handle)
    }
}

/// Construct the concrete driver for a `(provider, model)` pair.
fn build_handle(provider: &Provider, model: &ModelInfo) -> ProviderResult<SharedLanguageModel> {
    Ok(match Backend::from_api(&provider.api) {
        Backend::Anthropic => Arc::new(AnthropicModel::new(provider, model)?),
        Backend::OpenAiCompatible => Arc::new(OpenAiCompatibleModel::new(provider, model)?),
        Backend::Bedrock => Arc::new(BedrockModel::new(provider, model)?),
        Backend::Ollama => Arc::new(OllamaModel::new(provider, model)?),
        Backend::Owiseman => Arc::new(OwisemanModel::new(provider, model)?),
    })
}

/// Cache key: provider/model plus a hash of the canonically-serialized
/// merged options, so option changes produce distinct handles.
pub(crate) fn cache_key(provider: &Provider, model: &ModelInfo) -> String {
    let mut options = provider.options.clone();
    deep_merge(&mut options, &model.options);
    let canonical = canonical_json(&serde_json::Value::Object(options));

    let mut hasher = DefaultHasher::new();
    provider.api.hash(&mut hasher);
    canonical.hash(&mut hasher);
    format!("{}/{}/{:016x}", provider.id, model.id, hasher.finish())
}

/// Canonically-ordered JSON: object keys sorted, `null` members dropped.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn write(value: &serde_json::Value, out: &mut String) {
        match value {
            serde_json::Value::Object(map) => {
                out.push('{');
                let mut keys: Vec<&String> = map
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, _)| k)
                    .collect();
                keys.sort();
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            serde_json::Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Merged per-request driver options:
/// provider options ← caller headers ← per-model headers ← per-model options.
pub struct RequestContext {
    /// Driver options (provider then model overlay).
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Request headers (caller then model overlay).
    pub headers: HashMap<String, String>,
}

/// Compute the per-request merge for a call.
pub fn request_context(
    provider: &Provider,
    model: &ModelInfo,
    call: &GenerateOptions,
) -> RequestContext {
    let mut options = provider.options.clone();

    let mut headers = call.headers.clone();
    for (key, value) in &model.headers {
        headers.insert(key.clone(), value.clone());
    }

    deep_merge(&mut options, &model.options);
    if let Some(serde_json::Value::Object(extra)) = &call.provider_options {
        deep_merge(&mut options, extra);
    }

    RequestContext { options, headers }
}

/// Compose the caller's cancellation signal with the configured timeout
/// (any-of semantics). The returned token fires when either does.
pub fn effective_cancellation(options: &GenerateOptions) -> CancellationToken {
    let parent = options.abort.clone().unwrap_or_default();
    match options.timeout {
        Some(timeout) => {
            let child = parent.child_token();
            let trigger = child.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                trigger.cancel();
            });
            child
        }
        None => parent,
    }
}
