//! OpenAI-compatible chat-completions driver.
//!
//! Serves OpenAI itself and every gateway speaking its dialect; also the
//! catch-all for unknown driver families. Streaming responses always
//! request usage inclusion so token counts arrive in the final chunk.

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
use std::collections::HashMap;
use tracing::debug;

/// OpenAI-compatible chat driver.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    provider: Provider,
    model: ModelInfo,
    chat_url: String,
}

impl OpenAiCompatibleModel {
    /// Construct for a `(provider, model)` pair.
    pub fn new(provider: &Provider, model: &ModelInfo) -> ProviderResult<Self> {
        let base_url = provider
            .base_url
            .clone()
            .ok_or_else(|| ProviderError::provider_init(&provider.id, "missing base URL"))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::provider_init(&provider.id, e.to_string()))?;

        Ok(Self {
            client,
            provider: provider.clone(),
            model: model.clone(),
            chat_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
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
            "messages": convert_messages(messages, options.system.as_deref()),
        });

        if let Some(temperature) = options.temperature {
            if self.model.capabilities.temperature {
                payload["temperature"] = json!(temperature);
            }
        }
        if let Some(top_p) = options.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = options.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if !options.tools.is_empty() {
            payload["tools"] = Value::Array(
                options
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
            payload["tool_choice"] = match &options.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::None => json!("none"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Tool(name) => {
                    json!({"type": "function", "function": {"name": name}})
                }
            };
        }
        if stream {
            payload["stream"] = json!(true);
            // Without this flag many compatible backends omit usage from
            // streaming responses entirely.
            payload["stream_options"] = json!({"include_usage": true});
        }
        payload
    }

    async fn send(
        &self,
        payload: &Value,
        options: &GenerateOptions,
    ) -> ProviderResult<reqwest::Response> {
        let ctx = request_context(&self.provider, &self.model, options);

        let mut request = self.client.post(&self.chat_url).json(payload);
        if let Some(key) = &self.provider.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        for (name, value) in &ctx.headers {
            request = request.header(name, value);
        }

        debug!(provider = %self.provider.id, model = %self.model.id, "Sending chat request");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::upstream(status.as_u16(), body));
        }
        Ok(response)
    }
}

/// Convert prompt messages to the OpenAI wire shape.
fn convert_messages(messages: &[Message], system: Option<&str>) -> Vec<Value> {
    let mut out = Vec::new();
    if let Some(system) = system {
        out.push(json!({"role": "system", "content": system}));
    }

    for message in messages {
        match message.role {
            Role::System => out.push(json!({"role": "system", "content": message.text()})),
            Role::User => out.push(json!({"role": "user", "content": message.text()})),
            Role::Assistant => {
                let mut entry = json!({"role": "assistant"});
                let text = message.text();
                if !text.is_empty() {
                    entry["content"] = json!(text);
                }
                let tool_calls: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::ToolCall { id, name, input } => Some(json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": input},
                        })),
                        _ => None,
                    })
                    .collect();
                if !tool_calls.is_empty() {
                    entry["tool_calls"] = Value::Array(tool_calls);
                }
                out.push(entry);
            }
            Role::Tool => {
                for part in &message.content {
                    if let ContentPart::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = part
                    {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
            }
        }
    }
    out
}

/// Parse a non-streaming completion body.
fn parse_completion(body: &Value) -> ProviderResult<GenerateResult> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::invalid_response("missing choices"))?;

    let mut content = Vec::new();
    let message = choice
        .get("message")
        .ok_or_else(|| ProviderError::invalid_response("missing message"))?;

    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content.push(ContentPart::Text {
                text: text.to_string(),
            });
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let function = call.get("function").cloned().unwrap_or_default();
            content.push(ContentPart::ToolCall {
                id,
                name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: function
                    .get("arguments")
                    .and_then(Value::as_str)
                    .unwrap_or("{}")
                    .to_string(),
            });
        }
    }

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(FinishReason::from_openai)
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
    Usage {
        input_tokens: read("prompt_tokens"),
        output_tokens: read("completion_tokens"),
        total_tokens: read("total_tokens"),
    }
}

/// Accumulates streamed tool-call fragments keyed by index.
#[derive(Default)]
struct ToolCallBuffer {
    calls: Vec<(String, String, String)>,
}

impl ToolCallBuffer {
    fn absorb(&mut self, delta_calls: &[Value]) {
        for call in delta_calls {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            while self.calls.len() <= index {
                self.calls.push(Default::default());
            }
            let slot = &mut self.calls[index];
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                slot.0 = id.to_string();
            }
            if let Some(function) = call.get("function") {
                if let Some(name) = function.get("name").and_then(Value::as_str) {
                    slot.1.push_str(name);
                }
                if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                    slot.2.push_str(arguments);
                }
            }
        }
    }

    fn into_parts(self) -> Vec<StreamPart> {
        self.calls
            .into_iter()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, arguments)| StreamPart::ToolCall {
                id: if id.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    id
                },
                name,
                input: if arguments.is_empty() {
                    "{}".to_string()
                } else {
                    arguments
                },
            })
            .collect()
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn generate(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<GenerateResult> {
        let payload = self.build_payload(&prompt, &options, false);
        let response = self.send(&payload, &options).await?;
        let body: Value = response.json().await?;
        parse_completion(&body)
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
            let mut text_open = false;
            let mut tool_calls = ToolCallBuffer::default();
            let mut usage = Usage::default();
            let mut finish_reason = FinishReason::Unknown;

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
                    if payload == "[DONE]" {
                        continue;
                    }
                    let Ok(value) = serde_json::from_str::<Value>(payload) else {
                        continue;
                    };

                    if let Some(u) = value.get("usage").filter(|u| !u.is_null()) {
                        usage = parse_usage(Some(u));
                    }

                    let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else {
                        continue;
                    };
                    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                        finish_reason = FinishReason::from_openai(reason);
                    }
                    let Some(delta) = choice.get("delta") else {
                        continue;
                    };
                    if let Some(text) = delta.get("content").and_then(Value::as_str) {
                        if !text.is_empty() {
                            if !text_open {
                                text_open = true;
                                yield StreamPart::TextStart { id: "txt_0".to_string() };
                            }
                            yield StreamPart::text_delta("txt_0", text);
                        }
                    }
                    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                        tool_calls.absorb(calls);
                    }
                }
            }

            if text_open {
                yield StreamPart::TextEnd { id: "txt_0".to_string() };
            }
            let synthesized = tool_calls.into_parts();
            let had_tool_calls = !synthesized.is_empty();
            for part in synthesized {
                yield part;
            }
            if had_tool_calls && finish_reason == FinishReason::Unknown {
                finish_reason = FinishReason::ToolCalls;
            } else if finish_reason == FinishReason::Unknown {
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

/// Construction helper for wrapper drivers that reuse this dialect with
/// a rewritten URL or extra headers.
impl OpenAiCompatibleModel {
    pub(crate) fn with_overrides(
        provider: &Provider,
        model: &ModelInfo,
        chat_url: String,
        extra_headers: HashMap<String, String>,
    ) -> ProviderResult<Self> {
        let mut provider = provider.clone();
        let mut model = model.clone();
        for (name, value) in extra_headers {
            model.headers.insert(name, value);
        }
        provider.base_url.get_or_insert_with(|| chat_url.clone());

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::provider_init(&provider.id, e.to_string()))?;

        Ok(Self {
            client,
            provider,
            model,
            chat_url,
        })
    }
}
