//! Streaming response types.

use serde::{Deserialize, Serialize};

/// One element of the incremental output stream of a language-model call.
///
/// Consumers should match on the full tag set and ignore unknown
/// [`StreamPart::Raw`] payloads for forward compatibility. Ordering
/// contract: `StreamStart` first; each `TextStart` strictly precedes its
/// deltas and `TextEnd`; `Finish` is last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StreamPart {
    /// The stream opened; carries any setup warnings.
    StreamStart {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    /// A text block is starting.
    TextStart { id: String },
    /// Text block delta.
    TextDelta { id: String, delta: String },
    /// A text block ended.
    TextEnd { id: String },
    /// A complete tool call.
    ToolCall {
        id: String,
        name: String,
        /// Arguments as a JSON string.
        input: String,
    },
    /// Terminal element.
    Finish {
        reason: FinishReason,
        usage: Usage,
    },
    /// A mid-stream error; `Finish { reason: Error }` follows.
    Error { message: String },
    /// Backend-specific payload passed through verbatim.
    Raw { value: serde_json::Value },
}

impl StreamPart {
    /// Create a text delta part.
    pub fn text_delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    /// Create a tool call part.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            input: input.into(),
        }
    }

    /// Whether this part terminates the stream.
    pub fn is_finish(&self) -> bool {
        matches!(self, StreamPart::Finish { .. })
    }
}

/// Why a response finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Normal completion.
    Stop,
    /// Stopped to run tool calls.
    ToolCalls,
    /// Output limit reached.
    Length,
    /// Content was filtered.
    ContentFilter,
    /// Terminated by an error (including cancellation).
    Error,
    /// Anything the backend reported that has no mapping.
    #[default]
    Unknown,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason`.
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            _ => Self::Unknown,
        }
    }

    /// Map an Anthropic-style `stop_reason`.
    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "end_turn" | "stop_sequence" => Self::Stop,
            "max_tokens" => Self::Length,
            "tool_use" => Self::ToolCalls,
            _ => Self::Unknown,
        }
    }
}

/// Token usage for one call. Absent counts stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

impl Usage {
    /// Usage with both counts known; total derived.
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            total_tokens: Some(input_tokens + output_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_openai() {
        assert_eq!(FinishReason::from_openai("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_openai("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_openai("tool_calls"),
            FinishReason::ToolCalls
        );
        assert_eq!(
            FinishReason::from_openai("content_filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(FinishReason::from_openai("weird"), FinishReason::Unknown);
    }

    #[test]
    fn test_finish_reason_anthropic() {
        assert_eq!(FinishReason::from_anthropic("end_turn"), FinishReason::Stop);
        assert_eq!(
            FinishReason::from_anthropic("max_tokens"),
            FinishReason::Length
        );
        assert_eq!(
            FinishReason::from_anthropic("tool_use"),
            FinishReason::ToolCalls
        );
    }

    #[test]
    fn test_usage_new() {
        let usage = Usage::new(1, 1);
        assert_eq!(usage.input_tokens, Some(1));
        assert_eq!(usage.output_tokens, Some(1));
        assert_eq!(usage.total_tokens, Some(2));
    }

    #[test]
    fn test_stream_part_tagging() {
        let part = StreamPart::StreamStart { warnings: vec![] };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["kind"], "stream-start");

        let part = StreamPart::text_delta("txt_1", "hi");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["kind"], "text-delta");

        let part = StreamPart::Finish {
            reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["kind"], "finish");
        assert_eq!(json["reason"], "tool-calls");
        assert!(part.is_finish());
    }
}
