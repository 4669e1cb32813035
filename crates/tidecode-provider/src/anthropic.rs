//! Anthropic Messages API driver.

use crate::adapter::{effective_cancellation, request_context};
use crate::error::{ProviderError, ProviderResult};
use crate::message::{ContentPart, Message, Role};
use crate::model::{ModelInfo, Provider};
use crate::stream::{FinishReason, StreamPart, Usage};
use crate::{GenerateOptions, GenerateResult, LanguageModel, ToolChoice};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API driver.
pub struct AnthropicModel {
    client: reqwest::Client,
    provider: Provider,
    model: ModelInfo,
    messages_url: String,
}

impl AnthropicModel {
    /// Construct for a `(provider, model)` pair.
    pub fn new(provider: &Provider, model: &ModelInfo) -> ProviderResult<Self> {
        let base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::provider_init(&provider.id, e.to_string()))?;

        Ok(Self {
            client,
            provider: provider.clone(),
            model: model.clone(),
            messages_url: format!("{}/v1/messages", base_url.trim_end_matches('/')),
        })
    }

    fn build_payload(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        stream: bool,
    ) -> Value {
        let mut payload = json!({
            "model": self.model.upstream_id(),
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": convert_messages(messages),
        });

        let system = system_text(messages, options.system.as_deref());
        if !system.is_empty() {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = options.temperature {
            if self.model.capabilities.temperature {
                payload["temperature"] = json!(temperature);
            }
        }
        if !options.tools.is_empty() {
            payload["tools"] = Value::Array(
                options
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.parameters,
                        })
                    })
                    .collect(),
            );
            payload["tool_choice"] = match &options.tool_choice {
                ToolChoice::Auto => json!({"type": "auto"}),
                ToolChoice::None => json!({"type": "none"}),
                ToolChoice::Required => json!({"type": "any"}),
                ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
            };
        }
        if stream {
            payload["stream"] = json!(true);
        }
        payload
    }

    async fn send(
        &self,
        payload: &Value,
        options: &GenerateOptions,
    ) -> ProviderResult<reqwest::Response> {
        let key = self
            .provider
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::MissingApiKey(self.provider.id.clone()))?;
        let ctx = request_context(&self.provider, &self.model, options);

        let mut request = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload);
        for (name, value) in &ctx.headers {
            request = request.header(name, value);
        }

        debug!(model = %self.model.id, "Sending messages request");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::upstream(status.as_u16(), body));
        }
        Ok(response)
    }
}

/// System prompt: explicit option first, then system-role messages.
fn system_text(messages: &[Message], system: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(system) = system {
        parts.push(system.to_string());
    }
    for message in messages {
        if message.role == Role::System {
            parts.push(message.text());
        }
    }
    parts.join("\n\n")
}

/// Convert prompt messages to the Messages API shape. System messages go
/// through the top-level `system` field instead.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::new();
    for message in messages {
        let role = match message.role {
            Role::System => continue,
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
        };

        let content: Vec<Value> = message
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentPart::ToolCall { id, name, input } => {
                    let input: Value =
                        serde_json::from_str(input).unwrap_or_else(|_| json!({}));
                    Some(json!({"type": "tool_use", "id": id, "name": name, "input": input}))
                }
                ContentPart::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => {
                    let mut value = json!({
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                    });
                    if let Some(true) = is_error {
                        value["is_error"] = json!(true);
                    }
                    Some(value)
                }
                ContentPart::Image { media_type, data } => Some(json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": media_type, "data": data},
                })),
                ContentPart::Reasoning { .. } => None,
            })
            .collect();

        if !content.is_empty() {
            out.push(json!({"role": role, "content": content}));
        }
    }
    out
}

/// Parse a non-streaming messages response.
fn parse_response(body: &Value) -> ProviderResult<GenerateResult> {
    let content_blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::invalid_response("missing content"))?;

    let mut content = Vec::new();
    for block in content_blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                content.push(ContentPart::Text {
                    text: block
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            Some("tool_use") => {
                content.push(ContentPart::ToolCall {
                    id: block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input: block.get("input").cloned().unwrap_or(json!({})).to_string(),
                });
            }
            Some("thinking") => {
                content.push(ContentPart::Reasoning {
                    text: block
                        .get("thinking")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            _ => {}
        }
    }

    let finish_reason = body
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(FinishReason::from_anthropic)
        .unwrap_or_default();

    Ok(GenerateResult {
        content,
        finish_reason,
        usage: parse_usage(body.get("usage")),
        warnings: Vec::new(),
    })
}

fn parse_usage(usage: Option<&Value>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    let read = |key: &str| usage.get(key).and_then(Value::as_u64).map(|v| v as u32);
    let input = read("input_tokens");
    let output = read("output_tokens");
    Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: match (input, output) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        },
    }
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    async fn generate(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<GenerateResult> {
        let payload = self.build_payload(&prompt, &options, false);
        let response = self.send(&payload, &options).await?;
        let body: Value = response.json().await?;
        parse_response(&body)
    }

    async fn stream(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, StreamPart>> {
        let payload = self.build_payload(&prompt, &options, true);
        let token = effective_cancellation(&options);
        let response = self.send(&payload, &options).await?;

        let stream = async_stream::stream! {
            yield StreamPart::StreamStart { warnings: vec![] };

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut usage = Usage::default();
            let mut finish_reason = FinishReason::Unknown;
            // Open blocks keyed by index: (id, is_text, name, input buffer).
            let mut blocks: std::collections::HashMap<u64, (String, bool, String, String)> =
                std::collections::HashMap::new();

            loop {
                let chunk = tokio::select! {
                    _ = token.cancelled() => {
                        yield StreamPart::Error { message: "request cancelled".to_string() };
                        yield StreamPart::Finish { reason: FinishReason::Error, usage };
                        return;
                    }
                    chunk = bytes.next() => chunk,
                };

                let data = match chunk {
                    Some(Ok(data)) => data,
                    Some(Err(e)) => {
                        yield StreamPart::Error { message: e.to_string() };
                        yield StreamPart::Finish { reason: FinishReason::Error, usage };
                        return;
                    }
                    None => break,
                };

                buffer.push_str(&String::from_utf8_lossy(&data));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let Ok(event) = serde_json::from_str::<Value>(payload) else {
                        continue;
                    };

                    match event.get("type").and_then(Value::as_str) {
                        Some("message_start") => {
                            let u = event.pointer("/message/usage");
                            if u.is_some() {
                                usage = parse_usage(u);
                            }
                        }
                        Some("content_block_start") => {
                            let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                            let block = event.get("content_block").cloned().unwrap_or_default();
                            match block.get("type").and_then(Value::as_str) {
                                Some("text") => {
                                    let id = format!("txt_{index}");
                                    blocks.insert(index, (id.clone(), true, String::new(), String::new()));
                                    yield StreamPart::TextStart { id };
                                }
                                Some("tool_use") => {
                                    let id = block.get("id").and_then(Value::as_str)
                                        .unwrap_or_default().to_string();
                                    let name = block.get("name").and_then(Value::as_str)
                                        .unwrap_or_default().to_string();
                                    blocks.insert(index, (id, false, name, String::new()));
                                }
                                _ => {}
                            }
                        }
                        Some("content_block_delta") => {
                            let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                            let delta = event.get("delta").cloned().unwrap_or_default();
                            match delta.get("type").and_then(Value::as_str) {
                                Some("text_delta") => {
                                    if let Some((id, true, _, _)) = blocks.get(&index) {
                                        let text = delta.get("text").and_then(Value::as_str)
                                            .unwrap_or_default().to_string();
                                        yield StreamPart::text_delta(id.clone(), text);
                                    }
                                }
                                Some("input_json_delta") => {
                                    if let Some(entry) = blocks.get_mut(&index) {
                                        entry.3.push_str(
                                            delta.get("partial_json").and_then(Value::as_str)
                                                .unwrap_or_default(),
                                        );
                                    }
                                }
                                _ => {}
                            }
                        }
                        Some("content_block_stop") => {
                            let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                            if let Some((id, is_text, name, input)) = blocks.remove(&index) {
                                if is_text {
                                    yield StreamPart::TextEnd { id };
                                } else {
                                    yield StreamPart::ToolCall {
                                        id,
                                        name,
                                        input: if input.is_empty() { "{}".to_string() } else { input },
                                    };
                                }
                            }
                        }
                        Some("message_delta") => {
                            if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                                finish_reason = FinishReason::from_anthropic(reason);
                            }
                            if let Some(u) = event.get("usage") {
                                let update = parse_usage(Some(u));
                                if update.output_tokens.is_some() {
                                    usage.output_tokens = update.output_tokens;
                                    usage.total_tokens = match (usage.input_tokens, update.output_tokens) {
                                        (Some(i), Some(o)) => Some(i + o),
                                        _ => usage.total_tokens,
                                    };
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }

            if finish_reason == FinishReason::Unknown {
                finish_reason = FinishReason::Stop;
            }
            yield StreamPart::Finish { reason: finish_reason, usage };
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
