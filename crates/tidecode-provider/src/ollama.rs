//! Ollama driver and model discovery.
//!
//! Speaks Ollama's native `/api/chat` endpoint (JSON-line streaming) and
//! discovers installed models via `/api/tags` during registry build.
//! Local models advertise no native tool support; with prompt-mode tool
//! calling selected, the prompt shim is the route into tool loops.

use crate::adapter::{effective_cancellation, request_context};
use crate::error::{ProviderError, ProviderResult};
use crate::message::{ContentPart, Message, Role};
use crate::model::{ModelInfo, Provider};
use crate::prompt_shim;
use crate::registry::ProviderLoader;
use crate::stream::{FinishReason, StreamPart, Usage};
use crate::{GenerateOptions, GenerateResult, LanguageModel};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use tidecode_core::config::ToolCallMode;
use tracing::{debug, warn};

/// Discovery probe timeout.
const DISCOVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(2500);

/// Fallback model synthesized when discovery fails on an empty registry.
const FALLBACK_MODEL: &str = "llama3.1:8b-instruct";

/// Ollama native chat driver.
pub struct OllamaModel {
    client: reqwest::Client,
    provider: Provider,
    model: ModelInfo,
    chat_url: String,
}

impl OllamaModel {
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
            chat_url: format!("{}/api/chat", base_url.trim_end_matches('/')),
        })
    }

    /// Prompt-mode tool calling: tools requested, no native support, and
    /// the user selected the prompt strategy.
    fn uses_prompt_shim(&self, options: &GenerateOptions) -> bool {
        !options.tools.is_empty()
            && !self.model.capabilities.tool_call
            && self.provider.tool_call_mode == Some(ToolCallMode::Prompt)
    }

    fn build_payload(&self, messages: &[Message], options: &GenerateOptions, stream: bool) -> Value {
        let shim = self.uses_prompt_shim(options);
        let mut wire_messages = Vec::new();

        if shim {
            wire_messages.push(json!({
                "role": "system",
                "content": prompt_shim::system_preamble(&options.tools, &options.tool_choice),
            }));
        }
        if let Some(system) = &options.system {
            wire_messages.push(json!({"role": "system", "content": system}));
        }
        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };
            wire_messages.push(json!({"role": role, "content": message.text()}));
        }

        let mut payload = json!({
            "model": self.model.upstream_id(),
            "messages": wire_messages,
            "stream": stream,
        });
        if shim {
            payload["format"] = json!("json");
        }

        let mut model_options = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            model_options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            model_options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !model_options.is_empty() {
            payload["options"] = Value::Object(model_options);
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
        for (name, value) in &ctx.headers {
            request = request.header(name, value);
        }

        debug!(model = %self.model.id, "Sending Ollama chat request");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::upstream(status.as_u16(), body));
        }
        Ok(response)
    }
}

/// Parse one chat response (or final streaming line) into text + usage.
fn parse_chat_line(value: &Value) -> (String, Usage, bool) {
    let text = value
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let read = |key: &str| value.get(key).and_then(Value::as_u64).map(|v| v as u32);
    let input = read("prompt_eval_count");
    let output = read("eval_count");
    let usage = Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: match (input, output) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        },
    };
    let done = value.get("done").and_then(Value::as_bool).unwrap_or(false);
    (text, usage, done)
}

/// Parse a complete non-streaming chat response.
fn parse_chat_response(body: &Value) -> ProviderResult<GenerateResult> {
    if body.pointer("/message/content").is_none() {
        return Err(ProviderError::invalid_response("missing message content"));
    }
    let (text, usage, _) = parse_chat_line(body);
    Ok(GenerateResult {
        content: vec![ContentPart::Text { text }],
        finish_reason: FinishReason::Stop,
        usage,
        warnings: Vec::new(),
    })
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn generate(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<GenerateResult> {
        let shim = self.uses_prompt_shim(&options);
        let payload = self.build_payload(&prompt, &options, false);
        let response = self.send(&payload, &options).await?;
        let body: Value = response.json().await?;
        let result = parse_chat_response(&body)?;

        if !shim {
            return Ok(result);
        }

        // Re-interpret the accumulated text through the shim.
        let text = result
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<String>();
        let parts = prompt_shim::parts_from_text(&text, result.usage);
        crate::collect_stream(futures::stream::iter(parts).boxed()).await
    }

    async fn stream(
        &self,
        prompt: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, StreamPart>> {
        let shim = self.uses_prompt_shim(&options);
        let payload = self.build_payload(&prompt, &options, true);
        let token = effective_cancellation(&options);
        let response = self.send(&payload, &options).await?;

        let stream = async_stream::stream! {
            yield StreamPart::StreamStart { warnings: vec![] };

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut accumulated = String::new();
            let mut text_open = false;
            let mut usage = Usage::default();

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
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(value) = serde_json::from_str::<Value>(&line) else {
                        continue;
                    };
                    let (text, line_usage, done) = parse_chat_line(&value);

                    if line_usage.input_tokens.is_some() || line_usage.output_tokens.is_some() {
                        usage = line_usage;
                    }

                    if shim {
                        // Accumulate silently; parsed once at stream end.
                        accumulated.push_str(&text);
                    } else if !text.is_empty() {
                        if !text_open {
                            text_open = true;
                            yield StreamPart::TextStart { id: "txt_0".to_string() };
                        }
                        yield StreamPart::text_delta("txt_0", text);
                    }

                    if done {
                        break;
                    }
                }
            }

            if shim {
                for part in prompt_shim::parts_from_text(&accumulated, usage) {
                    yield part;
                }
            } else {
                if text_open {
                    yield StreamPart::TextEnd { id: "txt_0".to_string() };
                }
                yield StreamPart::Finish { reason: FinishReason::Stop, usage };
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

// ============================================================================
// Discovery
// ============================================================================

/// Synthesize a descriptor for a discovered model from a template cloned
/// off an existing entry, falling back to conservative defaults.
fn synthesize_model(provider: &Provider, name: &str) -> ModelInfo {
    let mut model = provider
        .models
        .values()
        .next()
        .cloned()
        .unwrap_or_else(|| {
            let mut fallback = ModelInfo::new(name, &provider.id);
            fallback.limit.context = 16_384;
            fallback.limit.output = 4_096;
            fallback
        });

    model.id = name.to_string();
    model.api_id = name.to_string();
    model.name = name.to_string();
    model.capabilities.tool_call = provider.tool_call_mode == Some(ToolCallMode::Prompt);
    model.provider_id = provider.id.clone();
    model
}

/// `/api/tags` response shape.
#[derive(serde::Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(serde::Deserialize)]
struct TagEntry {
    name: String,
}

/// Registry loader: discover installed models at build time.
pub struct OllamaLoader;

#[async_trait]
impl ProviderLoader for OllamaLoader {
    fn provider_id(&self) -> &str {
        "ollama"
    }

    fn autoload(
        &self,
        _provider: &Provider,
        configured: bool,
        env: &HashMap<String, String>,
    ) -> bool {
        configured || env.contains_key("OLLAMA_BASE_URL") || env.contains_key("OLLAMA_HOST")
    }

    async fn load(
        &self,
        provider: &mut Provider,
        _env: &HashMap<String, String>,
    ) -> ProviderResult<()> {
        let base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:11434".to_string());
        let tags_url = format!("{}/api/tags", base_url.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::provider_init(&provider.id, e.to_string()))?;

        match client.get(&tags_url).send().await {
            Ok(response) if response.status().is_success() => {
                let tags: TagsResponse = response.json().await?;
                debug!(count = tags.models.len(), "Discovered Ollama models");
                for entry in tags.models {
                    if !provider.models.contains_key(&entry.name) {
                        let model = synthesize_model(provider, &entry.name);
                        provider.models.insert(entry.name, model);
                    }
                }
                Ok(())
            }
            other => {
                if let Err(e) = other {
                    warn!(url = %tags_url, error = %e, "Ollama discovery failed");
                }
                if provider.models.is_empty() {
                    // Keep the endpoint addressable even when the probe fails.
                    let model = synthesize_model(provider, FALLBACK_MODEL);
                    provider.models.insert(FALLBACK_MODEL.to_string(), model);
                }
                Ok(())
            }
        }
    }
}
