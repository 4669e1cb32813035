//! The validated configuration record consumed by the runtime core.
//!
//! File parsing, layering and CLI overrides happen upstream; this module
//! defines the shapes the core reads and the final validation pass.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Top-level configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Pinned default model, `"<providerID>/<modelID>"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Pinned small model (summaries, titles), same format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_model: Option<String>,

    /// Keep alpha models in the registry.
    pub experimental: bool,

    /// Providers removed after merge regardless of credentials.
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub disabled_providers: HashSet<String>,

    /// When present, only these providers survive the merge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_providers: Option<HashSet<String>>,

    /// Per-provider declarations and overrides, in declaration order.
    #[serde(skip_serializing_if = "ProviderMap::is_empty")]
    pub providers: ProviderMap,

    /// Configured MCP servers, keyed by name.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub mcp: HashMap<String, McpEntryConfig>,
}

impl Config {
    /// Final validation pass over an already-parsed record.
    pub fn validate(&self) -> ConfigResult<()> {
        for pinned in [&self.model, &self.small_model].into_iter().flatten() {
            parse_model_ref(pinned)?;
        }

        for (id, provider) in &self.providers {
            if !provider.whitelist.is_empty() && !provider.blacklist.is_empty() {
                return Err(ConfigError::ConflictingModelFilters(id.clone()));
            }
        }

        for (name, entry) in &self.mcp {
            match entry {
                McpEntryConfig::Local { command, .. } => {
                    if command.is_empty() {
                        return Err(ConfigError::EmptyMcpCommand(name.clone()));
                    }
                }
                McpEntryConfig::Remote { url, .. } => {
                    if url::Url::parse(url).is_err() {
                        return Err(ConfigError::InvalidMcpUrl {
                            name: name.clone(),
                            url: url.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Parse a `"<providerID>/<modelID>"` reference.
pub fn parse_model_ref(s: &str) -> ConfigResult<(&str, &str)> {
    match s.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(ConfigError::InvalidModelRef(s.to_string())),
    }
}

/// Provider table preserving declaration order.
///
/// The order providers appear in the configuration document is
/// load-bearing for default- and small-model selection, which a plain
/// map cannot carry. Lookups stay by key; iteration follows the
/// document.
#[derive(Debug, Clone, Default)]
pub struct ProviderMap {
    entries: Vec<(String, ProviderConfig)>,
}

impl ProviderMap {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry. A replaced entry keeps its original
    /// position; a new one appends.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        config: ProviderConfig,
    ) -> Option<ProviderConfig> {
        let id = id.into();
        match self.entries.iter_mut().find(|(key, _)| *key == id) {
            Some((_, existing)) => Some(std::mem::replace(existing, config)),
            None => {
                self.entries.push((id, config));
                None
            }
        }
    }

    /// Lookup by provider id.
    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.entries
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, config)| config)
    }

    /// Whether a provider is declared.
    pub fn contains_key(&self, id: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == id)
    }

    /// Provider ids in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.entries.iter().map(|(key, config)| (key, config))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<'a> IntoIterator for &'a ProviderMap {
    type Item = (&'a String, &'a ProviderConfig);
    type IntoIter = Box<dyn Iterator<Item = Self::Item> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.entries.iter().map(|(key, config)| (key, config)))
    }
}

impl Serialize for ProviderMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, config) in &self.entries {
            map.serialize_entry(key, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProviderMap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> serde::de::Visitor<'de> for MapVisitor {
            type Value = ProviderMap;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of provider configurations")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<Self::Value, A::Error> {
                let mut map = ProviderMap::new();
                // MapAccess yields entries in document order.
                while let Some((key, config)) = access.next_entry::<String, ProviderConfig>()? {
                    map.insert(key, config);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

/// Per-provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Display name override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Backend driver family (e.g. `"@ai-sdk/openai-compatible"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    /// Upstream base URL override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// API key supplied directly in configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable names consulted for credentials.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Model IDs removed from this provider after merge.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blacklist: Vec<String>,

    /// When non-empty, only these model IDs survive.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub whitelist: Vec<String>,

    /// Tool-call strategy for backends without native support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_mode: Option<ToolCallMode>,

    /// Custom models and per-model overrides.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, ModelConfig>,

    /// Arbitrary provider options, passed through to the driver.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// How tool calls reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallMode {
    /// Backend-native function calling.
    Native,
    /// Prompt-engineered JSON envelope (for backends without native support).
    Prompt,
}

/// Per-model configuration overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Remove this model even if the catalog carries it.
    pub disabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<bool>,

    /// Context window override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<u32>,

    /// Output limit override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<u32>,

    /// Extra request headers for this model.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Arbitrary model options, passed through to the driver.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,

    /// Named parameter overlays surfaced as selectable entries.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub variants: HashMap<String, VariantConfig>,
}

/// A named parameter overlay on a base model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariantConfig {
    /// Remove this variant from the registry.
    pub disabled: bool,

    /// Options applied on top of the base model.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// MCP entries
// ============================================================================

/// A configured MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpEntryConfig {
    /// Local server spawned over stdio.
    Local {
        /// Command line, argv style.
        command: Vec<String>,
        /// Extra environment for the child.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        environment: HashMap<String, String>,
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
    /// Remote server over streamable HTTP.
    Remote {
        url: String,
        #[serde(default = "default_enabled")]
        enabled: bool,
        #[serde(default)]
        oauth: McpOauthConfig,
    },
}

fn default_enabled() -> bool {
    true
}

impl McpEntryConfig {
    /// Whether this entry should be connected.
    pub fn enabled(&self) -> bool {
        match self {
            McpEntryConfig::Local { enabled, .. } | McpEntryConfig::Remote { enabled, .. } => {
                *enabled
            }
        }
    }
}

/// OAuth configuration on a remote MCP entry.
///
/// Accepts `false` (never attempt OAuth), `{}` (OAuth with dynamic client
/// registration), or explicit client credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpOauthConfig {
    /// `oauth: false` disables the flow; `oauth: true` enables it with
    /// dynamic registration.
    Flag(bool),
    /// Pre-registered client credentials.
    Settings(McpOauthSettings),
}

/// Explicit OAuth client settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpOauthSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Default for McpOauthConfig {
    fn default() -> Self {
        // Absent means: attempt OAuth if the server demands it.
        McpOauthConfig::Settings(McpOauthSettings::default())
    }
}

impl McpOauthConfig {
    /// Resolved settings, or `None` when OAuth is disabled outright.
    pub fn settings(&self) -> Option<McpOauthSettings> {
        match self {
            McpOauthConfig::Flag(false) => None,
            McpOauthConfig::Flag(true) => Some(McpOauthSettings::default()),
            McpOauthConfig::Settings(s) => Some(s.clone()),
        }
    }
}
