//! Amazon Bedrock driver (converse API).
//!
//! Authenticates with a Bedrock API key (`AWS_BEARER_TOKEN_BEDROCK`).
//! Model IDs receive a region-family inference-profile prefix when both
//! the model family and the configured region require one.

use crate::adapter::{effective_cancellation, request_context};
use crate::error::{ProviderError, ProviderResult};
use crate::message::{ContentPart, Message, Role};
use crate::model::{ModelInfo, Provider};
use crate::stream::{FinishReason, StreamPart, Usage};
use crate::{GenerateOptions, GenerateResult, LanguageModel};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_REGION: &str = "us-east-1";

/// Apply the region-family prefix to a Bedrock model ID when required.
///
/// Already-prefixed IDs (`global.`, `us.`, `eu.`, `apac.`, `au.`, `jp.`)
/// pass through unchanged; GovCloud is never prefixed.
pub fn apply_region_prefix(model_id: &str, region: &str) -> String {
    const PASSTHROUGH: &[&str] = &["global.", "us.", "eu.", "apac.", "au.", "jp."];
    if PASSTHROUGH.iter().any(|p| model_id.starts_with(p)) {
        return model_id.to_string();
    }
    if region.starts_with("us-gov") {
        return model_id.to_string();
    }

    let family = region.split('-').next().unwrap_or("");
    match family {
        "us" => {
            let needs_prefix = ["nova", "claude", "deepseek"]
                .iter()
                .any(|m| model_id.contains(m));
            if needs_prefix {
                format!("us.{model_id}")
            } else {
                model_id.to_string()
            }
        }
        "eu" => {
            let region_needs_prefix = [
                "eu-west-1",
                "eu-west-2",
                "eu-west-3",
                "eu-north-1",
                "eu-central-1",
                "eu-south-1",
                "eu-south-2",
            ]
            .contains(&region);
            let model_needs_prefix = ["claude", "nova-lite", "nova-micro", "llama3", "pixtral"]
                .iter()
                .any(|m| model_id.contains(m));
            if region_needs_prefix && model_needs_prefix {
                format!("eu.{model_id}")
            } else {
                model_id.to_string()
            }
        }
        "ap" => {
            let is_australia = ["ap-southeast-2", "ap-southeast-4"].contains(&region);
            let is_japan = ["ap-northeast-1", "ap-northeast-3"].contains(&region);
            let is_sonnet_or_haiku =
                model_id.contains("claude-sonnet-4") || model_id.contains("claude-haiku");

            if is_australia && is_sonnet_or_haiku {
                format!("au.{model_id}")
            } else if is_japan && is_sonnet_or_haiku {
                format!("jp.{model_id}")
            } else {
                let needs_prefix = ["claude", "nova-lite", "nova-micro", "nova-pro"]
                    .iter()
                    .any(|m| model_id.contains(m));
                if needs_prefix {
                    format!("apac.{model_id}")
                } else {
                    model_id.to_string()
                }
            }
        }
        _ => model_id.to_string(),
    }
}

/// Amazon Bedrock converse driver.
pub struct BedrockModel {
    client: reqwest::Client,
    provider: Provider,
    model: ModelInfo,
    region: String,
    bearer_token: String,
}

impl BedrockModel {
    /// Construct for a `(provider, model)` pair.
    pub fn new(provider: &Provider, model: &ModelInfo) -> ProviderResult<Self> {
        let bearer_token = provider
            .api_key
            .clone()
            .ok_or_else(|| {
                ProviderError::provider_init(
                    &provider.id,
                    "missing Bedrock API key (AWS_BEARER_TOKEN_BEDROCK)",
                )
            })?;

        let region = provider
            .options
            .get("region")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .or_else(|| std::env::var("AWS_REGION").ok())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::provider_init(&provider.id, e.to_string()))?;

        debug!(region = %region, model = %model.id, "Creating Bedrock driver");
        Ok(Self {
            client,
            provider: provider.clone(),
            model: model.clone(),
            region,
            bearer_token,
        })
    }

    fn converse_url(&self) -> String {
        let model_id = apply_region_prefix(self.model.upstream_id(), &self.region);
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/converse",
            self.region,
            urlencoding::encode(&model_id),
        )
    }

    fn build_payload(&self, messages: &[Message], options: &GenerateOptions) -> Value {
        let (system, converse_messages) = convert_messages(messages, options.system.as_deref());

        let mut payload = json!({ "messages": converse_messages });
        if let Some(system) = system {
            payload["system"] = system;
        }

        let mut inference = serde_json::Map::new();
        if let Some(max_tokens) = options.max_tokens {
            inference.insert("maxTokens".to_string(), json!(max_tokens));
        }
        if let Some(temperature) = options.temperature {
            if self.model.capabilities.temperature {
                inference.insert("temperature".to_string(), json!(temperature));
            }
        }
        if !inference.is_empty() {
            payload["inferenceConfig"] = Value::Object(inference);
        }

        if !options.tools.is_empty() {
            payload["toolConfig"] = json!({
                "tools": options.tools.iter().map(|tool| json!({
                    "toolSpec": {
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": {"json": tool.parameters},
                    }
                })).collect::<Vec<_>>(),
            });
        }
        payload
    }
}

/// Convert messages to the converse shape; system content is split out.
fn convert_messages(messages: &[Message], system: Option<&str>) -> (Option<Value>, Vec<Value>) {
    let mut system_blocks = Vec::new();
    if let Some(system) = system {
        system_blocks.push(json!({"text": system}));
    }

    let mut out = Vec::new();
    for message in messages {
        match message.role {
            Role::System => system_blocks.push(json!({"text": message.text()})),
            Role::User | Role::Tool => {
                let content = convert_content(&message.content);
                if !content.is_empty() {
                    out.push(json!({"role": "user", "content": content}));
                }
            }
            Role::Assistant => {
                let content = convert_content(&message.content);
                if !content.is_empty() {
                    out.push(json!({"role": "assistant", "content": content}));
                }
            }
        }
    }

    let system = if system_blocks.is_empty() {
        None
    } else {
        Some(Value::Array(system_blocks))
    };
    (system, out)
}

fn convert_content(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(json!({"text": text})),
            ContentPart::ToolCall { id, name, input } => {
                let input: Value = serde_json::from_str(input).unwrap_or_else(|_| json!({}));
                Some(json!({
                    "toolUse": {"toolUseId": id, "name": name, "input": input}
                }))
            }
            ContentPart::ToolResult {
                tool_call_id,
                content,
                ..
            } => Some(json!({
                "toolResult": {
                    "toolUseId": tool_call_id,
                    "content": [{"text": content}],
                }
            })),
            ContentPart::Image { media_type, data } => {
                let format = media_type.split('/').next_back().unwrap_or("png");
                Some(json!({
                    "image": {"format": format, "source": {"bytes": data}}
                }))
            }
            ContentPart::Reasoning { .. } => None,
        })
        .collect()
}

/// Parse a converse response.
fn parse_response(body: &Value) -> ProviderResult<GenerateResult> {
    let blocks = body
        .pointer("/output/message/content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::invalid_response("missing output content"))?;

    let mut content = Vec::new();
    for block in blocks {
        if let Some(text) = block.get("text").and_then(Value::as_str) {
            content.push(ContentPart::Text {
                text: text.to_string(),
            });
        } else if let Some(tool_use) = block.get("toolUse") {
            content.push(ContentPart::ToolCall {
                id: tool_use
                    .get("toolUseId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: tool_use
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: tool_use
                    .get("input")
                    .cloned()
                    .unwrap_or(json!({}))
                    .to_string(),
            });
        }
    }

    let finish_reason = match body.get("stopReason").and_then(Value::as_str) {
        Some("end_turn" | "stop_sequence") => FinishReason::Stop,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        Some("content_filtered") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    };

    let usage = body.get("usage").map(|u| {
        let read = |key: &str| u.get(key).and_then(Value::as_u64).map(|v| v as u32);
        Usage {
            input_tokens: read("inputTokens"),
            output_tokens: read("outputTokens"),
            total_tokens: read("totalTokens"),
        }
    });

    Ok(GenerateResult {
        content,
        finish_reason,
        usage: usage.unwrap_or_default(),
        warnings: Vec::new(),
    })
}

#[async_trait]
impl LanguageModel for BedrockModel {
    async fn generate(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<GenerateResult> {
        let payload = self.build_payload(&prompt, &options);
        let ctx = request_context(&self.provider, &self.model, &options);

        let mut request = self
            .client
            .post(self.converse_url())
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .json(&payload);
        for (name, value) in &ctx.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::upstream(status.as_u16(), body));
        }
        let body: Value = response.json().await?;
        parse_response(&body)
    }

    async fn stream(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, StreamPart>> {
        // The converse-stream endpoint speaks the AWS binary event-stream
        // framing; the collected call is replayed as parts instead.
        let token = effective_cancellation(&options);
        let result = tokio::select! {
            _ = token.cancelled() => Err(ProviderError::Cancelled),
            result = self.generate(prompt, options) => result,
        };

        let stream = async_stream::stream! {
            yield StreamPart::StreamStart { warnings: vec![] };
            match result {
                Ok(result) => {
                    for (index, part) in result.content.iter().enumerate() {
                        match part {
                            ContentPart::Text { text } => {
                                let id = format!("txt_{index}");
                                yield StreamPart::TextStart { id: id.clone() };
                                yield StreamPart::text_delta(id.clone(), text.clone());
                                yield StreamPart::TextEnd { id };
                            }
                            ContentPart::ToolCall { id, name, input } => {
                                yield StreamPart::ToolCall {
                                    id: id.clone(),
                                    name: name.clone(),
                                    input: input.clone(),
                                };
                            }
                            _ => {}
                        }
                    }
                    yield StreamPart::Finish {
                        reason: result.finish_reason,
                        usage: result.usage,
                    };
                }
                Err(e) => {
                    yield StreamPart::Error { message: e.to_string() };
                    yield StreamPart::Finish {
                        reason: FinishReason::Error,
                        usage: Usage::default(),
                    };
                }
            }
        };
        Ok(stream.boxed())
    }

    fn model_info(&self) -> &ModelInfo {
        &self.model
    }

    fn provider_id(&self) -> &str {
        &self.provider.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eu_prefix_applied() {
        assert_eq!(
            apply_region_prefix("anthropic.claude-3-5-sonnet", "eu-central-1"),
            "eu.anthropic.claude-3-5-sonnet"
        );
    }

    #[test]
    fn test_govcloud_never_prefixed() {
        assert_eq!(
            apply_region_prefix("anthropic.claude-3-5-sonnet", "us-gov-west-1"),
            "anthropic.claude-3-5-sonnet"
        );
    }

    #[test]
    fn test_us_prefix_for_claude() {
        assert_eq!(
            apply_region_prefix("anthropic.claude-sonnet-4-5", "us-east-1"),
            "us.anthropic.claude-sonnet-4-5"
        );
        // Titan stays unprefixed.
        assert_eq!(
            apply_region_prefix("amazon.titan-text-express-v1", "us-east-1"),
            "amazon.titan-text-express-v1"
        );
    }

    #[test]
    fn test_already_prefixed_pass_through() {
        assert_eq!(
            apply_region_prefix("global.anthropic.claude-sonnet-4-5", "eu-central-1"),
            "global.anthropic.claude-sonnet-4-5"
        );
        assert_eq!(
            apply_region_prefix("jp.anthropic.claude-haiku-4-5", "ap-northeast-1"),
            "jp.anthropic.claude-haiku-4-5"
        );
    }

    #[test]
    fn test_australia_and_japan_prefixes() {
        assert_eq!(
            apply_region_prefix("anthropic.claude-sonnet-4-5", "ap-southeast-2"),
            "au.anthropic.claude-sonnet-4-5"
        );
        assert_eq!(
            apply_region_prefix("anthropic.claude-haiku-4-5", "ap-northeast-1"),
            "jp.anthropic.claude-haiku-4-5"
        );
        // Other APAC regions take the apac. prefix for Claude families.
        assert_eq!(
            apply_region_prefix("anthropic.claude-sonnet-4-5", "ap-south-1"),
            "apac.anthropic.claude-sonnet-4-5"
        );
    }

    #[test]
    fn test_eu_region_without_profile_support() {
        // Not in the cross-region list: no prefix even for Claude.
        assert_eq!(
            apply_region_prefix("anthropic.claude-sonnet-4-5", "eu-central-2"),
            "anthropic.claude-sonnet-4-5"
        );
    }

    #[test]
    fn test_parse_response() {
        let body = serde_json::json!({
            "output": {"message": {"role": "assistant", "content": [
                {"text": "hi"},
                {"toolUse": {"toolUseId": "t1", "name": "grep", "input": {"q": "x"}}}
            ]}},
            "stopReason": "tool_use",
            "usage": {"inputTokens": 5, "outputTokens": 7, "totalTokens": 12}
        });
        let result = parse_response(&body).unwrap();
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.usage.total_tokens, Some(12));
    }

    #[test]
    fn test_new_requires_bearer_token() {
        let provider = Provider::new("amazon-bedrock", "Bedrock", crate::catalog::API_BEDROCK);
        let model = ModelInfo::new("anthropic.claude-sonnet-4-5", "amazon-bedrock");
        assert!(matches!(
            BedrockModel::new(&provider, &model),
            Err(ProviderError::ProviderInit { .. })
        ));
    }

    #[test]
    fn test_converse_url_includes_prefixed_model() {
        let mut provider = Provider::new("amazon-bedrock", "Bedrock", crate::catalog::API_BEDROCK);
        provider.api_key = Some("bearer".to_string());
        provider
            .options
            .insert("region".to_string(), serde_json::json!("eu-central-1"));
        let model = ModelInfo::new("anthropic.claude-3-5-sonnet", "amazon-bedrock");
        let driver = BedrockModel::new(&provider, &model).unwrap();
        let url = driver.converse_url();
        assert!(url.contains("bedrock-runtime.eu-central-1.amazonaws.com"));
        assert!(url.contains("eu.anthropic.claude-3-5-sonnet"));
    }
}
