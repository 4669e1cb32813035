//! Model and provider descriptors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Information about one addressable model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Registry ID (what users select).
    pub id: String,
    /// Provider ID (e.g. "anthropic").
    pub provider_id: String,
    /// Upstream API model ID. Defaults to `id`; never empty.
    #[serde(default)]
    pub api_id: String,
    /// Human-readable name.
    pub name: String,
    /// Model family (e.g. "claude-4").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// Release date (ISO 8601), when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    /// Capabilities.
    pub capabilities: ModelCapabilities,
    /// Pricing.
    pub cost: ModelCost,
    /// Token limits.
    pub limit: ModelLimit,
    /// Lifecycle status.
    #[serde(default)]
    pub status: ModelStatus,
    /// Arbitrary driver options.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Extra request headers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Named parameter overlays surfaced as selectable entries.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variants: HashMap<String, ModelVariant>,
}

impl ModelInfo {
    /// Create a new model with defaults.
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            api_id: id.clone(),
            id,
            provider_id: provider_id.into(),
            ..Default::default()
        }
    }

    /// The ID sent upstream (`api_id`, falling back to `id`).
    pub fn upstream_id(&self) -> &str {
        if self.api_id.is_empty() {
            &self.id
        } else {
            &self.api_id
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the capabilities.
    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the cost.
    pub fn with_cost(mut self, cost: ModelCost) -> Self {
        self.cost = cost;
        self
    }

    /// Set the limits.
    pub fn with_limit(mut self, limit: ModelLimit) -> Self {
        self.limit = limit;
        self
    }
}

/// Model capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Supports the temperature parameter.
    #[serde(default)]
    pub temperature: bool,
    /// Supports reasoning/thinking mode.
    #[serde(default)]
    pub reasoning: bool,
    /// Supports file attachments.
    #[serde(default)]
    pub attachment: bool,
    /// Supports tool/function calling.
    #[serde(default = "default_true")]
    pub tool_call: bool,
    /// Interleaved reasoning support.
    #[serde(default)]
    pub interleaved: Interleaved,
    /// Input modality support.
    #[serde(default)]
    pub input: ModalitySupport,
    /// Output modality support.
    #[serde(default)]
    pub output: ModalitySupport,
}

fn default_true() -> bool {
    true
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            temperature: true,
            reasoning: false,
            attachment: false,
            tool_call: true,
            interleaved: Interleaved::default(),
            input: ModalitySupport::default(),
            output: ModalitySupport::default(),
        }
    }
}

/// Interleaved-reasoning discriminator: plain boolean, or the name of the
/// tagged field the backend uses to mark interleaved segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Interleaved {
    Bool(bool),
    Field { field: String },
}

impl Default for Interleaved {
    fn default() -> Self {
        Interleaved::Bool(false)
    }
}

impl Interleaved {
    /// Whether any interleaving is supported.
    pub fn enabled(&self) -> bool {
        !matches!(self, Interleaved::Bool(false))
    }
}

/// Modality support (input or output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalitySupport {
    #[serde(default = "default_true")]
    pub text: bool,
    #[serde(default)]
    pub image: bool,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub video: bool,
    #[serde(default)]
    pub pdf: bool,
}

impl Default for ModalitySupport {
    fn default() -> Self {
        Self {
            text: true,
            image: false,
            audio: false,
            video: false,
            pdf: false,
        }
    }
}

/// Pricing per million tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
    /// Rates applied beyond 200K context, when the backend charges more.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_200k: Option<CostTier>,
}

/// A secondary pricing tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTier {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
}

impl ModelCost {
    /// Cost in dollars for a given usage.
    pub fn calculate(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input
            + (output_tokens as f64 / 1_000_000.0) * self.output
    }
}

/// Token limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelLimit {
    /// Maximum context length.
    pub context: u32,
    /// Maximum output tokens.
    pub output: u32,
}

/// Model lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Alpha,
    Beta,
    #[default]
    Active,
    Deprecated,
}

/// A named parameter overlay on a base model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelVariant {
    /// Pruned from the registry when set.
    #[serde(default)]
    pub disabled: bool,
    /// Options applied on top of the base model.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Where a provider's credentials last came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// Environment variable.
    Env,
    /// User configuration.
    Config,
    /// Custom loader decided autoload.
    Custom,
    /// Stored key from the auth command.
    Api,
}

/// A provider with its surviving models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    /// Backend driver family (e.g. `"@ai-sdk/openai-compatible"`).
    pub api: String,
    /// Last-winning origin of the credentials, for diagnostics.
    pub source: CredentialSource,
    /// Environment variable names consulted for an API key.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Arbitrary provider options merged from catalog, config and plugins.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Tool-call strategy override (prompt-mode for tool-less backends).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_mode: Option<tidecode_core::config::ToolCallMode>,
    /// Models keyed by registry ID.
    pub models: HashMap<String, ModelInfo>,
}

impl Provider {
    /// Create an empty provider skeleton.
    pub fn new(id: impl Into<String>, name: impl Into<String>, api: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            api: api.into(),
            source: CredentialSource::Config,
            env: Vec::new(),
            api_key: None,
            base_url: None,
            options: serde_json::Map::new(),
            tool_call_mode: None,
            models: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_id_defaults() {
        let model = ModelInfo::new("gpt-5", "openai");
        assert_eq!(model.upstream_id(), "gpt-5");

        let mut model = ModelInfo::new("sonnet", "anthropic");
        model.api_id = "claude-sonnet-4-5-20250929".to_string();
        assert_eq!(model.upstream_id(), "claude-sonnet-4-5-20250929");

        // Empty api_id falls back rather than going out empty.
        let mut model = ModelInfo::new("x", "p");
        model.api_id = String::new();
        assert_eq!(model.upstream_id(), "x");
    }

    #[test]
    fn test_cost_calculation() {
        let cost = ModelCost {
            input: 3.0,
            output: 15.0,
            cache_read: 0.3,
            cache_write: 3.75,
            over_200k: None,
        };
        let total = cost.calculate(1000, 500);
        assert!((total - 0.0105).abs() < 0.0001);
    }

    #[test]
    fn test_interleaved_forms() {
        let caps: ModelCapabilities =
            serde_json::from_str(r#"{"interleaved": true}"#).unwrap();
        assert_eq!(caps.interleaved, Interleaved::Bool(true));
        assert!(caps.interleaved.enabled());

        let caps: ModelCapabilities =
            serde_json::from_str(r#"{"interleaved": {"field": "thinking"}}"#).unwrap();
        assert!(matches!(caps.interleaved, Interleaved::Field { ref field } if field == "thinking"));
        assert!(caps.interleaved.enabled());

        let caps = ModelCapabilities::default();
        assert!(!caps.interleaved.enabled());
    }

    #[test]
    fn test_status_ordering_default() {
        assert_eq!(ModelStatus::default(), ModelStatus::Active);
        let status: ModelStatus = serde_json::from_str("\"deprecated\"").unwrap();
        assert_eq!(status, ModelStatus::Deprecated);
    }

    #[test]
    fn test_builder() {
        let model = ModelInfo::new("test-model", "test-provider")
            .with_name("Test Model")
            .with_limit(ModelLimit {
                context: 8000,
                output: 2000,
            });
        assert_eq!(model.id, "test-model");
        assert_eq!(model.name, "Test Model");
        assert_eq!(model.limit.context, 8000);
    }

    #[test]
    fn test_over_200k_tier() {
        let json = r#"{
            "input": 3.0, "output": 15.0,
            "over_200k": {"input": 6.0, "output": 22.5}
        }"#;
        let cost: ModelCost = serde_json::from_str(json).unwrap();
        assert_eq!(cost.over_200k.unwrap().input, 6.0);
    }
}
