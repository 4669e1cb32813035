//! Provider registry and language-model adaptation for tidecode.
//!
//! This crate turns a heterogeneous population of LLM backends into one
//! streaming interface:
//!
//! - [`registry`] merges the bundled catalog with user configuration,
//!   environment credentials, stored API keys, plugin options and
//!   per-provider custom loaders, then applies the configured filters.
//! - [`adapter`] lazily constructs and memoizes a concrete
//!   [`LanguageModel`] handle per `(provider, model)`.
//! - Backend drivers: Anthropic, the OpenAI-compatible catch-all,
//!   Amazon Bedrock, Ollama and Owiseman.
//! - [`prompt_shim`] is the prompt-engineered tool-calling route for
//!   backends without native tool support.

pub mod adapter;
pub mod anthropic;
pub mod bedrock;
pub mod catalog;
mod error;
mod fuzzy;
mod message;
mod model;
pub mod ollama;
pub mod openai_compatible;
pub mod owiseman;
pub mod prompt_shim;
pub mod registry;
mod stream;

pub use error::{ProviderError, ProviderResult};
pub use message::{ContentPart, Message, Role};
pub use model::{
    CostTier, CredentialSource, Interleaved, ModalitySupport, ModelCapabilities, ModelCost,
    ModelInfo, ModelLimit, ModelStatus, ModelVariant, Provider,
};
pub use registry::{ProviderLoader, ProviderPlugin, Registry, RegistryBuilder};
pub use stream::{FinishReason, StreamPart, Usage};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

/// Options for a single generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling.
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// System prompt.
    pub system: Option<String>,
    /// Tools available to the model.
    pub tools: Vec<ToolDefinition>,
    /// Tool-choice directive.
    pub tool_choice: ToolChoice,
    /// Caller-supplied request headers.
    pub headers: HashMap<String, String>,
    /// External cancellation signal.
    pub abort: Option<tokio_util::sync::CancellationToken>,
    /// Request timeout, composed with `abort` (any-of semantics).
    pub timeout: Option<std::time::Duration>,
    /// Provider-specific options.
    pub provider_options: Option<serde_json::Value>,
}

/// Tool-choice directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
    /// Tools disabled for this call.
    None,
    /// The model must call some tool.
    Required,
    /// The model must call this specific tool.
    Tool(String),
}

impl ToolChoice {
    /// Wire spelling used in prompts and OpenAI-style payloads.
    pub fn as_str(&self) -> &str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
            ToolChoice::Required => "required",
            ToolChoice::Tool(name) => name,
        }
    }
}

/// A tool definition surfaced to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the parameters.
    pub parameters: serde_json::Value,
}

/// A collected (non-streaming) generation result.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    /// Output parts: text, tool calls, reasoning.
    pub content: Vec<ContentPart>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    /// Non-fatal notices produced while serving the request.
    pub warnings: Vec<String>,
}

/// The uniform streaming language-model interface.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a collected response.
    async fn generate(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<GenerateResult>;

    /// Generate a streaming response.
    ///
    /// Mid-stream failures surface as [`StreamPart::Error`] followed by a
    /// terminal [`StreamPart::Finish`] with reason `error`; the stream
    /// itself never yields `Err`.
    async fn stream(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, StreamPart>>;

    /// The model this handle serves.
    fn model_info(&self) -> &ModelInfo;

    /// The provider ID (e.g. "anthropic").
    fn provider_id(&self) -> &str;
}

/// A shared language-model handle.
pub type SharedLanguageModel = Arc<dyn LanguageModel>;

/// Collect a stream into a [`GenerateResult`].
///
/// Used by drivers whose non-streaming path is just the streaming path
/// drained, and by tests.
pub async fn collect_stream(
    mut stream: BoxStream<'_, StreamPart>,
) -> ProviderResult<GenerateResult> {
    use futures::StreamExt;

    let mut content: Vec<ContentPart> = Vec::new();
    let mut warnings = Vec::new();
    let mut finish_reason = FinishReason::Unknown;
    let mut usage = Usage::default();
    let mut open_text: Option<(String, String)> = None;

    while let Some(part) = stream.next().await {
        match part {
            StreamPart::StreamStart { warnings: w } => warnings.extend(w),
            StreamPart::TextStart { id } => open_text = Some((id, String::new())),
            StreamPart::TextDelta { id, delta } => match &mut open_text {
                Some((open_id, buffer)) if *open_id == id => buffer.push_str(&delta),
                _ => content.push(ContentPart::Text { text: delta }),
            },
            StreamPart::TextEnd { id } => {
                if let Some((open_id, buffer)) = open_text.take() {
                    if open_id == id {
                        content.push(ContentPart::Text { text: buffer });
                    }
                }
            }
            StreamPart::ToolCall { id, name, input } => {
                content.push(ContentPart::ToolCall { id, name, input });
            }
            StreamPart::Finish { reason, usage: u } => {
                finish_reason = reason;
                usage = u;
            }
            StreamPart::Error { message } => warnings.push(message),
            StreamPart::Raw { .. } => {}
        }
    }

    Ok(GenerateResult {
        content,
        finish_reason,
        usage,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_collect_stream() {
        let parts = vec![
            StreamPart::StreamStart { warnings: vec![] },
            StreamPart::TextStart {
                id: "txt_1".to_string(),
            },
            StreamPart::text_delta("txt_1", "hel"),
            StreamPart::text_delta("txt_1", "lo"),
            StreamPart::TextEnd {
                id: "txt_1".to_string(),
            },
            StreamPart::tool_call("cal_1", "read", "{}"),
            StreamPart::Finish {
                reason: FinishReason::ToolCalls,
                usage: Usage::new(3, 5),
            },
        ];
        let stream = futures::stream::iter(parts).boxed();

        let result = collect_stream(stream).await.unwrap();
        assert_eq!(result.content.len(), 2);
        assert_eq!(
            result.content[0],
            ContentPart::Text {
                text: "hello".to_string()
            }
        );
        assert!(matches!(result.content[1], ContentPart::ToolCall { .. }));
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.usage.total_tokens, Some(8));
    }

    #[test]
    fn test_tool_choice_wire_spelling() {
        assert_eq!(ToolChoice::Auto.as_str(), "auto");
        assert_eq!(ToolChoice::Required.as_str(), "required");
        assert_eq!(ToolChoice::Tool("grep".to_string()).as_str(), "grep");
    }
}
