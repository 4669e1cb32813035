//! Model registry: ordered merge of every model source.
//!
//! Construction is an ordered merge; later stages override earlier ones
//! where keys overlap. The order is load-bearing:
//!
//! 1. bundled catalog
//! 2. config-declared providers and models
//! 3. environment credentials
//! 4. stored API keys (auth command)
//! 5. plugin-supplied options
//! 6. per-provider custom loaders (autoload, model discovery)
//! 7. config overrides, second pass
//! 8. filters (disabled/enabled sets, black/whitelists, status and
//!    variant pruning, credential-less and empty providers dropped)
//!
//! Rebuilding with identical inputs yields structurally equal output.

use crate::adapter::HandleCache;
use crate::catalog;
use crate::error::{ProviderError, ProviderResult};
use crate::fuzzy;
use crate::model::{CredentialSource, ModelInfo, ModelStatus, Provider};
use crate::SharedLanguageModel;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tidecode_core::config::{parse_model_ref, Config, ModelConfig, ProviderConfig};
use tracing::{debug, warn};

/// Prefix-priority list biasing default-model selection.
const MODEL_PRIORITY: &[&str] = &[
    "gpt-5",
    "claude-sonnet-4",
    "gemini-3-pro",
    "claude-opus",
    "claude-haiku",
    "gemini-3",
    "grok",
    "llama",
];

/// Names searched, in order, by the small-model policy.
const SMALL_MODEL_CANDIDATES: &[&str] = &[
    "claude-haiku-4-5",
    "3-5-haiku",
    "gemini-3-flash",
    "gemini-2.5-flash",
    "gpt-5-nano",
];

/// A per-provider custom loader (stage 6).
///
/// Loaders may decide autoload from the environment or configuration and
/// may mutate the provider's model list (e.g. endpoint discovery).
#[async_trait]
pub trait ProviderLoader: Send + Sync {
    /// The provider this loader is bound to.
    fn provider_id(&self) -> &str;

    /// Whether the provider should load without explicit credentials.
    fn autoload(&self, provider: &Provider, configured: bool, env: &HashMap<String, String>)
        -> bool;

    /// Mutate the provider (typically: discover models).
    async fn load(
        &self,
        provider: &mut Provider,
        env: &HashMap<String, String>,
    ) -> ProviderResult<()>;
}

/// A plugin's auth loader (stage 5): given the provider's credential,
/// produce options to deep-merge.
pub struct ProviderPlugin {
    pub provider_id: String,
    pub options: Arc<dyn Fn(&Provider) -> Option<serde_json::Value> + Send + Sync>,
}

/// Builds a [`Registry`] from all merge sources.
pub struct RegistryBuilder {
    config: Config,
    env: HashMap<String, String>,
    api_keys: HashMap<String, String>,
    plugins: Vec<ProviderPlugin>,
    loaders: Vec<Box<dyn ProviderLoader>>,
}

impl RegistryBuilder {
    /// Start from a validated configuration, snapshotting the process
    /// environment.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            env: std::env::vars().collect(),
            api_keys: HashMap::new(),
            plugins: Vec::new(),
            loaders: vec![
                Box::new(crate::ollama::OllamaLoader),
                Box::new(crate::owiseman::OwisemanLoader),
            ],
        }
    }

    /// Replace the environment snapshot (tests, embedding).
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Supply stored API keys from the auth command's store.
    pub fn with_api_keys(mut self, api_keys: HashMap<String, String>) -> Self {
        self.api_keys = api_keys;
        self
    }

    /// Load stored API keys directly from the key store.
    pub async fn load_api_keys(mut self, store: &tidecode_auth::ApiKeyStore) -> Self {
        match store.all().await {
            Ok(all) => {
                for (provider, info) in all {
                    if let Some(key) = info.as_api_key() {
                        self.api_keys.insert(provider, key.to_string());
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to read API key store"),
        }
        self
    }

    /// Register a plugin auth loader.
    pub fn with_plugin(mut self, plugin: ProviderPlugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Register a custom loader (replacing none of the defaults).
    pub fn with_loader(mut self, loader: Box<dyn ProviderLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Drop the built-in discovery loaders (tests).
    pub fn without_default_loaders(mut self) -> Self {
        self.loaders.clear();
        self
    }

    /// Run the merge.
    pub async fn build(self) -> ProviderResult<Registry> {
        // Stage 1: bundled catalog.
        let mut providers = catalog::bundled();

        // Stage 2: config-declared providers and models.
        for (id, provider_config) in &self.config.providers {
            apply_provider_config(&mut providers, id, provider_config, true);
        }

        // Stage 3: environment credentials.
        for provider in providers.values_mut() {
            apply_env_credentials(provider, &self.env);
        }

        // Stage 4: stored API keys.
        for (id, key) in &self.api_keys {
            if let Some(provider) = providers.get_mut(id) {
                provider.api_key = Some(key.clone());
                provider.source = CredentialSource::Api;
            }
        }

        // Stage 5: plugin-supplied options.
        for plugin in &self.plugins {
            if let Some(provider) = providers.get_mut(&plugin.provider_id) {
                if provider.api_key.is_none() {
                    continue;
                }
                if let Some(options) = (plugin.options)(provider) {
                    if let serde_json::Value::Object(map) = options {
                        deep_merge(&mut provider.options, &map);
                    }
                }
            }
        }

        // Stage 6: custom loaders.
        let mut autoloaded: HashSet<String> = HashSet::new();
        for loader in &self.loaders {
            let id = loader.provider_id().to_string();
            let configured = self.config.providers.contains_key(&id);
            if let Some(provider) = providers.get_mut(&id) {
                let wants = provider.api_key.is_some()
                    || loader.autoload(provider, configured, &self.env);
                if !wants {
                    continue;
                }
                autoloaded.insert(id.clone());
                if provider.api_key.is_none() && !configured {
                    provider.source = CredentialSource::Custom;
                }
                if let Err(e) = loader.load(provider, &self.env).await {
                    warn!(provider = %id, error = %e, "Custom loader failed");
                }
            }
        }

        // Stage 7: config overrides, second pass.
        for (id, provider_config) in &self.config.providers {
            apply_provider_config(&mut providers, id, provider_config, false);
        }

        // Stage 8: filters.
        self.apply_filters(&mut providers, &autoloaded);

        let provider_order = provider_order(&self.config, &providers);

        Ok(Registry {
            providers,
            provider_order,
            model_pin: self.config.model.clone(),
            small_model_pin: self.config.small_model.clone(),
            handles: HandleCache::new(),
        })
    }

    fn apply_filters(
        &self,
        providers: &mut HashMap<String, Provider>,
        autoloaded: &HashSet<String>,
    ) {
        // Disabled set, then allow-set.
        providers.retain(|id, _| !self.config.disabled_providers.contains(id));
        if let Some(enabled) = &self.config.enabled_providers {
            providers.retain(|id, _| enabled.contains(id));
        }

        for (id, provider) in providers.iter_mut() {
            // Per-provider black/whitelist, applied after merge.
            if let Some(provider_config) = self.config.providers.get(id) {
                if !provider_config.whitelist.is_empty() {
                    let keep: HashSet<&String> = provider_config.whitelist.iter().collect();
                    provider.models.retain(|model_id, _| keep.contains(model_id));
                } else if !provider_config.blacklist.is_empty() {
                    for blocked in &provider_config.blacklist {
                        provider.models.remove(blocked);
                    }
                }
            }

            // Status pruning: alpha unless experimental, deprecated always.
            provider.models.retain(|_, model| match model.status {
                ModelStatus::Alpha => self.config.experimental,
                ModelStatus::Deprecated => false,
                _ => true,
            });

            // Disabled variants.
            for model in provider.models.values_mut() {
                model.variants.retain(|_, variant| !variant.disabled);
            }
        }

        // A provider without credentials survives only via autoload.
        providers.retain(|id, provider| {
            let keep = provider.api_key.is_some() || autoloaded.contains(id);
            if !keep {
                debug!(provider = %id, "Dropping credential-less provider");
            }
            keep
        });

        // A provider with zero surviving models is dropped.
        providers.retain(|_, provider| !provider.models.is_empty());
    }
}

/// Apply one provider's configuration. `create` distinguishes the first
/// pass (which may introduce providers and models) from the second
/// (override-only).
fn apply_provider_config(
    providers: &mut HashMap<String, Provider>,
    id: &str,
    config: &ProviderConfig,
    create: bool,
) {
    if !providers.contains_key(id) {
        if !create {
            return;
        }
        let api = config
            .api
            .clone()
            .unwrap_or_else(|| catalog::API_OPENAI_COMPATIBLE.to_string());
        providers.insert(
            id.to_string(),
            Provider::new(id, config.name.clone().unwrap_or_else(|| id.to_string()), api),
        );
    }
    let provider = providers.get_mut(id).expect("just inserted");

    if let Some(name) = &config.name {
        provider.name = name.clone();
    }
    if let Some(api) = &config.api {
        provider.api = api.clone();
    }
    if let Some(base_url) = &config.base_url {
        provider.base_url = Some(base_url.clone());
    }
    if let Some(api_key) = &config.api_key {
        provider.api_key = Some(api_key.clone());
        provider.source = CredentialSource::Config;
    }
    if !config.env.is_empty() {
        provider.env = config.env.clone();
    }
    if let Some(mode) = config.tool_call_mode {
        provider.tool_call_mode = Some(mode);
    }
    deep_merge(&mut provider.options, &config.options);

    for (model_id, model_config) in &config.models {
        let exists = provider.models.contains_key(model_id);
        if !exists && !create {
            continue;
        }
        let model = provider
            .models
            .entry(model_id.clone())
            .or_insert_with(|| ModelInfo::new(model_id.clone(), id.to_string()));
        apply_model_config(model, model_config);
    }
}

fn apply_model_config(model: &mut ModelInfo, config: &ModelConfig) {
    if let Some(name) = &config.name {
        model.name = name.clone();
    }
    if let Some(tool_call) = config.tool_call {
        model.capabilities.tool_call = tool_call;
    }
    if let Some(reasoning) = config.reasoning {
        model.capabilities.reasoning = reasoning;
    }
    if let Some(temperature) = config.temperature {
        model.capabilities.temperature = temperature;
    }
    if let Some(attachment) = config.attachment {
        model.capabilities.attachment = attachment;
    }
    if let Some(context) = config.context {
        model.limit.context = context;
    }
    if let Some(output) = config.output {
        model.limit.output = output;
    }
    for (key, value) in &config.headers {
        model.headers.insert(key.clone(), value.clone());
    }
    deep_merge(&mut model.options, &config.options);
    for (variant_id, variant_config) in &config.variants {
        let variant = model.variants.entry(variant_id.clone()).or_default();
        variant.disabled = variant_config.disabled;
        deep_merge(&mut variant.options, &variant_config.options);
    }
    if config.disabled {
        // Marked for removal; the filter stage honors the status.
        model.status = ModelStatus::Deprecated;
    }
}

/// Stage 3: the first present environment variable wins.
fn apply_env_credentials(provider: &mut Provider, env: &HashMap<String, String>) {
    let vars = provider.env.clone();
    for var in &vars {
        let Some(value) = env.get(var).filter(|v| !v.is_empty()) else {
            continue;
        };
        if var.contains("BASE_URL") || var.ends_with("_HOST") {
            provider.base_url = Some(value.clone());
        } else {
            provider.api_key = Some(value.clone());
        }
        provider.source = CredentialSource::Env;
        return;
    }
}

/// Recursive merge of JSON maps; `overlay` wins on scalar conflicts.
pub(crate) fn deep_merge(
    base: &mut serde_json::Map<String, serde_json::Value>,
    overlay: &serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Provider iteration order: config-declared providers in declaration
/// order, then the rest (sorted for determinism).
fn provider_order(config: &Config, providers: &HashMap<String, Provider>) -> Vec<String> {
    let mut order: Vec<String> = config
        .providers
        .keys()
        .filter(|id| providers.contains_key(*id))
        .cloned()
        .collect();

    let mut rest: Vec<String> = providers
        .keys()
        .filter(|id| !config.providers.contains_key(id.as_str()))
        .cloned()
        .collect();
    rest.sort();

    order.extend(rest);
    order
}

/// Priority rank of a model id; lower sorts first.
fn priority_rank(model_id: &str) -> usize {
    MODEL_PRIORITY
        .iter()
        .position(|prefix| model_id.starts_with(prefix))
        .unwrap_or(MODEL_PRIORITY.len())
}

/// The merged, filtered catalog of providers × models.
pub struct Registry {
    providers: HashMap<String, Provider>,
    provider_order: Vec<String>,
    model_pin: Option<String>,
    small_model_pin: Option<String>,
    handles: HandleCache,
}

impl Registry {
    /// All surviving providers.
    pub fn providers(&self) -> &HashMap<String, Provider> {
        &self.providers
    }

    /// Provider lookup.
    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.get(id)
    }

    /// Model lookup; a miss carries up to three fuzzy suggestions.
    pub fn model(&self, provider_id: &str, model_id: &str) -> ProviderResult<&ModelInfo> {
        if let Some(model) = self
            .providers
            .get(provider_id)
            .and_then(|p| p.models.get(model_id))
        {
            return Ok(model);
        }
        let query = format!("{provider_id}/{model_id}");
        Err(ProviderError::model_not_found(
            provider_id,
            model_id,
            fuzzy::suggestions(&self.candidates(), &query),
        ))
    }

    /// Fuzzy-search models by a loose string.
    pub fn find(&self, query: &str) -> Vec<String> {
        fuzzy::suggestions(&self.candidates(), query)
    }

    /// All addressable `provider/model` strings.
    pub fn candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = self
            .providers
            .values()
            .flat_map(|p| p.models.keys().map(move |m| format!("{}/{}", p.id, m)))
            .collect();
        candidates.sort();
        candidates
    }

    /// Default-model policy: honor the pin, else the first provider in
    /// order with surviving models, its models sorted by priority.
    pub fn default_model(&self) -> ProviderResult<(String, String)> {
        if let Some(pinned) = &self.model_pin {
            let (provider_id, model_id) = parse_model_ref(pinned)
                .map_err(|e| ProviderError::internal(e.to_string()))?;
            self.model(provider_id, model_id)?;
            return Ok((provider_id.to_string(), model_id.to_string()));
        }

        for provider_id in &self.provider_order {
            let Some(provider) = self.providers.get(provider_id) else {
                continue;
            };
            if provider.models.is_empty() {
                continue;
            }
            let mut ids: Vec<&String> = provider.models.keys().collect();
            ids.sort_by_key(|id| (priority_rank(id), (*id).clone()));
            return Ok((provider_id.clone(), ids[0].clone()));
        }

        Err(ProviderError::internal("registry has no models"))
    }

    /// Small-model policy: explicit pin wins; otherwise search each
    /// provider in order for the known small-model names, honoring the
    /// per-provider overrides.
    pub fn small_model(&self) -> Option<(String, String)> {
        if let Some(pinned) = &self.small_model_pin {
            if let Ok((provider_id, model_id)) = parse_model_ref(pinned) {
                if self.model(provider_id, model_id).is_ok() {
                    return Some((provider_id.to_string(), model_id.to_string()));
                }
            }
        }

        for provider_id in &self.provider_order {
            let provider = self.providers.get(provider_id)?;

            let overrides: Vec<&str> = if provider_id == "opencode" {
                vec!["gpt-5-nano"]
            } else if provider_id.starts_with("github-copilot") {
                let mut list = vec!["gpt-5-mini"];
                list.extend(
                    SMALL_MODEL_CANDIDATES
                        .iter()
                        .copied()
                        .filter(|c| c.contains("haiku")),
                );
                list
            } else {
                SMALL_MODEL_CANDIDATES.to_vec()
            };

            for needle in overrides {
                let mut ids: Vec<&String> = provider
                    .models
                    .keys()
                    .filter(|id| id.contains(needle))
                    .collect();
                ids.sort();
                if let Some(id) = ids.first() {
                    return Some((provider_id.clone(), (*id).clone()));
                }
            }
        }
        None
    }

    /// Memoized streaming-model handle for `(provider, model)`.
    pub async fn language(
        &self,
        provider_id: &str,
        model_id: &str,
    ) -> ProviderResult<SharedLanguageModel> {
        let model = self.model(provider_id, model_id)?.clone();
        let provider = self
            .providers
            .get(provider_id)
            .expect("model lookup implies provider")
            .clone();
        self.handles.get_or_build(&provider, &model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidecode_core::config::{ToolCallMode, VariantConfig};

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn build(config: Config, env_pairs: &[(&str, &str)]) -> Registry {
        RegistryBuilder::new(config)
            .with_env(env(env_pairs))
            .without_default_loaders()
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_credential_less_providers_dropped() {
        let registry = build(Config::default(), &[]).await;
        // No env, no keys, no loaders: nothing survives.
        assert!(registry.providers().is_empty());
    }

    #[tokio::test]
    async fn test_env_credentials_admit_provider() {
        let registry = build(Config::default(), &[("ANTHROPIC_API_KEY", "sk-ant")]).await;
        let provider = registry.provider("anthropic").unwrap();
        assert_eq!(provider.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(provider.source, CredentialSource::Env);
        assert!(registry.provider("openai").is_none());
    }

    #[tokio::test]
    async fn test_api_key_store_overrides_env() {
        let registry = {
            let mut api_keys = HashMap::new();
            api_keys.insert("anthropic".to_string(), "sk-stored".to_string());
            RegistryBuilder::new(Config::default())
                .with_env(env(&[("ANTHROPIC_API_KEY", "sk-env")]))
                .with_api_keys(api_keys)
                .without_default_loaders()
                .build()
                .await
                .unwrap()
        };
        let provider = registry.provider("anthropic").unwrap();
        assert_eq!(provider.api_key.as_deref(), Some("sk-stored"));
        assert_eq!(provider.source, CredentialSource::Api);
    }

    #[tokio::test]
    async fn test_config_declared_custom_provider() {
        let mut config = Config::default();
        let mut models = HashMap::new();
        models.insert(
            "my-model".to_string(),
            ModelConfig {
                context: Some(32_000),
                ..Default::default()
            },
        );
        config.providers.insert(
            "my-gateway".to_string(),
            ProviderConfig {
                base_url: Some("https://llm.internal/v1".to_string()),
                api_key: Some("secret".to_string()),
                models,
                ..Default::default()
            },
        );

        let registry = build(config, &[]).await;
        let provider = registry.provider("my-gateway").unwrap();
        assert_eq!(provider.api, catalog::API_OPENAI_COMPATIBLE);
        assert_eq!(provider.source, CredentialSource::Config);
        assert_eq!(provider.models["my-model"].limit.context, 32_000);
    }

    #[tokio::test]
    async fn test_blacklist_applied_after_merge() {
        let mut config = Config::default();
        config.providers.insert(
            "anthropic".to_string(),
            ProviderConfig {
                blacklist: vec!["claude-3-5-haiku".to_string()],
                ..Default::default()
            },
        );
        let registry = build(config, &[("ANTHROPIC_API_KEY", "k")]).await;
        let provider = registry.provider("anthropic").unwrap();
        assert!(!provider.models.contains_key("claude-3-5-haiku"));
        assert!(provider.models.contains_key("claude-sonnet-4-5"));
    }

    #[tokio::test]
    async fn test_whitelist_restricts() {
        let mut config = Config::default();
        config.providers.insert(
            "anthropic".to_string(),
            ProviderConfig {
                whitelist: vec!["claude-sonnet-4-5".to_string()],
                ..Default::default()
            },
        );
        let registry = build(config, &[("ANTHROPIC_API_KEY", "k")]).await;
        let provider = registry.provider("anthropic").unwrap();
        assert_eq!(provider.models.len(), 1);
        assert!(provider.models.contains_key("claude-sonnet-4-5"));
    }

    #[tokio::test]
    async fn test_alpha_pruned_unless_experimental() {
        let registry = build(Config::default(), &[("OPENAI_API_KEY", "k")]).await;
        let provider = registry.provider("openai").unwrap();
        assert!(!provider.models.contains_key("gpt-5.5-preview"));

        let mut config = Config::default();
        config.experimental = true;
        let registry = build(config, &[("OPENAI_API_KEY", "k")]).await;
        let provider = registry.provider("openai").unwrap();
        assert!(provider.models.contains_key("gpt-5.5-preview"));
    }

    #[tokio::test]
    async fn test_disabled_model_removes_provider_when_last() {
        let mut models = HashMap::new();
        models.insert(
            "old-model".to_string(),
            ModelConfig {
                disabled: true,
                ..Default::default()
            },
        );
        let mut config = Config::default();
        config.providers.insert(
            "lab".to_string(),
            ProviderConfig {
                api_key: Some("k".to_string()),
                models,
                ..Default::default()
            },
        );
        let registry = build(config, &[]).await;
        // The only model was disabled, so the provider vanished too.
        assert!(registry.provider("lab").is_none());
    }

    #[tokio::test]
    async fn test_disabled_variant_pruned() {
        let mut config = Config::default();
        let mut variants = HashMap::new();
        variants.insert(
            "thinking".to_string(),
            VariantConfig {
                disabled: true,
                ..Default::default()
            },
        );
        variants.insert("fast".to_string(), VariantConfig::default());
        let mut models = HashMap::new();
        models.insert(
            "claude-sonnet-4-5".to_string(),
            ModelConfig {
                variants,
                ..Default::default()
            },
        );
        config
            .providers
            .insert("anthropic".to_string(), ProviderConfig {
                models,
                ..Default::default()
            });

        let registry = build(config, &[("ANTHROPIC_API_KEY", "k")]).await;
        let model = registry.model("anthropic", "claude-sonnet-4-5").unwrap();
        assert!(!model.variants.contains_key("thinking"));
        assert!(model.variants.contains_key("fast"));
    }

    #[tokio::test]
    async fn test_disabled_providers_filter() {
        let mut config = Config::default();
        config.disabled_providers.insert("anthropic".to_string());
        let registry = build(
            config,
            &[("ANTHROPIC_API_KEY", "k"), ("OPENAI_API_KEY", "k")],
        )
        .await;
        assert!(registry.provider("anthropic").is_none());
        assert!(registry.provider("openai").is_some());
    }

    #[tokio::test]
    async fn test_enabled_providers_allow_set() {
        let mut config = Config::default();
        config.enabled_providers = Some(
            ["openai".to_string()].into_iter().collect(),
        );
        let registry = build(
            config,
            &[("ANTHROPIC_API_KEY", "k"), ("OPENAI_API_KEY", "k")],
        )
        .await;
        assert!(registry.provider("anthropic").is_none());
        assert!(registry.provider("openai").is_some());
    }

    #[tokio::test]
    async fn test_merge_idempotence() {
        let mut config = Config::default();
        config.providers.insert(
            "anthropic".to_string(),
            ProviderConfig {
                options: serde_json::json!({"beta": {"context": "1m"}})
                    .as_object()
                    .unwrap()
                    .clone(),
                ..Default::default()
            },
        );
        let env_pairs = [("ANTHROPIC_API_KEY", "k"), ("OPENAI_API_KEY", "k2")];

        let a = build(config.clone(), &env_pairs).await;
        let b = build(config, &env_pairs).await;

        assert_eq!(a.providers(), b.providers());
        assert_eq!(a.candidates(), b.candidates());
    }

    #[tokio::test]
    async fn test_model_not_found_suggestions() {
        let registry = build(Config::default(), &[("ANTHROPIC_API_KEY", "k")]).await;
        let err = registry.model("anthropic", "claude-sonet").unwrap_err();
        match err {
            ProviderError::ModelNotFound {
                provider,
                model,
                suggestions,
            } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(model, "claude-sonet");
                assert!(!suggestions.is_empty());
                assert!(suggestions.len() <= 3);
                assert!(suggestions[0].contains("claude-sonnet"));
            }
            other => panic!("Expected ModelNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_model_not_found_no_suggestions_for_garbage() {
        let registry = build(Config::default(), &[("ANTHROPIC_API_KEY", "k")]).await;
        let err = registry.model("anthropic", "zzz-qq-vv-123").unwrap_err();
        match err {
            ProviderError::ModelNotFound { suggestions, .. } => {
                assert!(suggestions.is_empty());
            }
            other => panic!("Expected ModelNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_default_model_pin() {
        let mut config = Config::default();
        config.model = Some("anthropic/claude-opus-4-5".to_string());
        let registry = build(config, &[("ANTHROPIC_API_KEY", "k")]).await;
        assert_eq!(
            registry.default_model().unwrap(),
            ("anthropic".to_string(), "claude-opus-4-5".to_string())
        );
    }

    #[tokio::test]
    async fn test_default_model_pin_missing_errors() {
        let mut config = Config::default();
        config.model = Some("anthropic/claude-nonexistent".to_string());
        let registry = build(config, &[("ANTHROPIC_API_KEY", "k")]).await;
        assert!(registry.default_model().is_err());
    }

    #[tokio::test]
    async fn test_default_model_priority_sort() {
        let registry = build(Config::default(), &[("OPENAI_API_KEY", "k")]).await;
        let (provider, model) = registry.default_model().unwrap();
        assert_eq!(provider, "openai");
        // "gpt-5" outranks "gpt-5-mini" lexicographically within the
        // same priority bucket.
        assert_eq!(model, "gpt-5");
    }

    #[tokio::test]
    async fn test_default_model_follows_declaration_order() {
        fn gateway(key: &str, model_id: &str) -> ProviderConfig {
            let mut models = HashMap::new();
            models.insert(model_id.to_string(), ModelConfig::default());
            ProviderConfig {
                api_key: Some(key.to_string()),
                base_url: Some("https://llm.internal/v1".to_string()),
                models,
                ..Default::default()
            }
        }

        // Declaration order, not alphabetical order, decides the default.
        let mut config = Config::default();
        config.providers.insert("zeta-gw", gateway("z", "zeta-model"));
        config.providers.insert("alpha-gw", gateway("a", "alpha-model"));

        let registry = build(config, &[]).await;
        let (provider, model) = registry.default_model().unwrap();
        assert_eq!(provider, "zeta-gw");
        assert_eq!(model, "zeta-model");
    }

    #[tokio::test]
    async fn test_small_model_policy() {
        let registry = build(Config::default(), &[("ANTHROPIC_API_KEY", "k")]).await;
        let (provider, model) = registry.small_model().unwrap();
        assert_eq!(provider, "anthropic");
        assert_eq!(model, "claude-haiku-4-5");
    }

    #[tokio::test]
    async fn test_small_model_pin_wins() {
        let mut config = Config::default();
        config.small_model = Some("openai/gpt-5-mini".to_string());
        let registry = build(
            config,
            &[("ANTHROPIC_API_KEY", "k"), ("OPENAI_API_KEY", "k")],
        )
        .await;
        assert_eq!(
            registry.small_model().unwrap(),
            ("openai".to_string(), "gpt-5-mini".to_string())
        );
    }

    #[tokio::test]
    async fn test_small_model_opencode_restricted() {
        let mut config = Config::default();
        config.enabled_providers = Some(["opencode".to_string()].into_iter().collect());
        let registry = build(config, &[("OPENCODE_API_KEY", "k")]).await;
        assert_eq!(
            registry.small_model().unwrap(),
            ("opencode".to_string(), "gpt-5-nano".to_string())
        );
    }

    #[tokio::test]
    async fn test_small_model_copilot_prefers_gpt5_mini() {
        let mut config = Config::default();
        config.enabled_providers = Some(["github-copilot".to_string()].into_iter().collect());
        let registry = build(config, &[("GITHUB_TOKEN", "t")]).await;
        assert_eq!(
            registry.small_model().unwrap(),
            ("github-copilot".to_string(), "gpt-5-mini".to_string())
        );
    }

    #[tokio::test]
    async fn test_tool_call_mode_from_config() {
        let mut config = Config::default();
        config.providers.insert(
            "ollama".to_string(),
            ProviderConfig {
                api_key: Some("unused".to_string()),
                tool_call_mode: Some(ToolCallMode::Prompt),
                ..Default::default()
            },
        );
        let registry = build(config, &[]).await;
        let provider = registry.provider("ollama").unwrap();
        assert_eq!(provider.tool_call_mode, Some(ToolCallMode::Prompt));
    }

    #[test]
    fn test_deep_merge() {
        let mut base = serde_json::json!({
            "a": 1,
            "nested": {"x": 1, "y": 2}
        })
        .as_object()
        .unwrap()
        .clone();
        let overlay = serde_json::json!({
            "b": 2,
            "nested": {"y": 3, "z": 4}
        })
        .as_object()
        .unwrap()
        .clone();

        deep_merge(&mut base, &overlay);
        assert_eq!(base["a"], 1);
        assert_eq!(base["b"], 2);
        assert_eq!(base["nested"]["x"], 1);
        assert_eq!(base["nested"]["y"], 3);
        assert_eq!(base["nested"]["z"], 4);
    }

    #[test]
    fn test_priority_rank() {
        assert!(priority_rank("gpt-5") < priority_rank("claude-sonnet-4-5"));
        assert!(priority_rank("claude-sonnet-4-5") < priority_rank("mistral-large-latest"));
        assert_eq!(priority_rank("unknown-model"), MODEL_PRIORITY.len());
    }
}
