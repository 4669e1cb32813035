//! Prompt-engineered tool calling.
//!
//! The only route by which backends without native tool support can
//! participate in tool loops. The model is instructed to answer with
//! exactly one JSON object in an envelope:
//!
//! ```json
//! {"opencode":{"tool_calls":[{"name":"<T>","arguments":{...}}]}}
//! {"opencode":{"final":"<text>"}}
//! ```
//!
//! Parsing is deliberately lenient: the first balanced `{…}` substring is
//! taken, `toolCalls`/`toolcalls` spellings are accepted, and
//! `content`/`text` work for the final-text shape. The envelope keeps
//! the established ecosystem spelling so models conditioned on the
//! convention keep working.

use crate::stream::{FinishReason, StreamPart, Usage};
use crate::{ToolChoice, ToolDefinition};
use serde_json::Value;

/// Envelope key the model is instructed to emit.
const ENVELOPE_KEY: &str = "opencode";

/// Build the system preamble instructing the model how to call tools.
pub fn system_preamble(tools: &[ToolDefinition], tool_choice: &ToolChoice) -> String {
    let mut out = String::new();
    out.push_str(
        "You can call tools. Respond with EXACTLY ONE JSON object and nothing else, in one of these two shapes:\n\n",
    );
    out.push_str(&format!(
        "To call tools:\n{{\"{ENVELOPE_KEY}\":{{\"tool_calls\":[{{\"name\":\"<tool name>\",\"arguments\":{{...}}}}]}}}}\n\n",
    ));
    out.push_str(&format!(
        "To answer directly:\n{{\"{ENVELOPE_KEY}\":{{\"final\":\"<your answer>\"}}}}\n\n",
    ));

    out.push_str("Available tools:\n");
    for tool in tools {
        let entry = serde_json::json!({
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        });
        out.push_str(&entry.to_string());
        out.push('\n');
    }

    out.push_str(&format!("\ntool_choice: {}\n", tool_choice.as_str()));
    out
}

/// Extract the first balanced `{…}` substring. Strings and escapes are
/// honored so braces inside JSON strings don't unbalance the scan.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// A tool call parsed out of a shim response.
#[derive(Debug, Clone, PartialEq)]
pub struct ShimToolCall {
    pub name: String,
    pub arguments: Value,
}

/// What the model answered through the shim.
#[derive(Debug, Clone, PartialEq)]
pub enum ShimOutput {
    /// One or more tool calls.
    ToolCalls(Vec<ShimToolCall>),
    /// Final text.
    Final(String),
}

/// Parse a full response. Never fails: unparseable content is final text.
pub fn parse_response(text: &str) -> ShimOutput {
    let Some(json) = extract_json(text) else {
        return ShimOutput::Final(text.to_string());
    };
    let Ok(value) = serde_json::from_str::<Value>(json) else {
        return ShimOutput::Final(text.to_string());
    };

    let envelope = value.get(ENVELOPE_KEY).unwrap_or(&value);

    for key in ["tool_calls", "toolCalls", "toolcalls"] {
        if let Some(calls) = envelope.get(key).and_then(Value::as_array) {
            let parsed: Vec<ShimToolCall> = calls
                .iter()
                .filter_map(|call| {
                    let name = call.get("name")?.as_str()?.to_string();
                    let arguments = call
                        .get("arguments")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default()));
                    Some(ShimToolCall { name, arguments })
                })
                .collect();
            if !parsed.is_empty() {
                return ShimOutput::ToolCalls(parsed);
            }
        }
    }

    for key in ["final", "content", "text"] {
        if let Some(text) = envelope.get(key).and_then(Value::as_str) {
            return ShimOutput::Final(text.to_string());
        }
    }

    ShimOutput::Final(text.to_string())
}

/// Turn an accumulated shim response into stream parts: either
/// synthesized tool calls (fresh UUID each) or a text start/delta/end
/// trio, followed by the terminal finish.
pub fn parts_from_text(text: &str, usage: Usage) -> Vec<StreamPart> {
    match parse_response(text) {
        ShimOutput::ToolCalls(calls) => {
            let mut parts: Vec<StreamPart> = calls
                .into_iter()
                .map(|call| StreamPart::ToolCall {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: call.name,
                    input: call.arguments.to_string(),
                })
                .collect();
            parts.push(StreamPart::Finish {
                reason: FinishReason::ToolCalls,
                usage,
            });
            parts
        }
        ShimOutput::Final(text) => vec![
            StreamPart::TextStart {
                id: "txt_0".to_string(),
            },
            StreamPart::text_delta("txt_0", text),
            StreamPart::TextEnd {
                id: "txt_0".to_string(),
            },
            StreamPart::Finish {
                reason: FinishReason::Stop,
                usage,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hover_tool() -> ToolDefinition {
        ToolDefinition {
            name: "ide.hover".to_string(),
            description: "Hover information at a position".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "uri": {"type": "string"},
                    "line": {"type": "integer"},
                    "character": {"type": "integer"}
                }
            }),
        }
    }

    #[test]
    fn test_preamble_lists_tools_and_choice() {
        let preamble = system_preamble(&[hover_tool()], &ToolChoice::Auto);
        assert!(preamble.contains("EXACTLY ONE JSON object"));
        assert!(preamble.contains("\"opencode\""));
        assert!(preamble.contains("ide.hover"));
        assert!(preamble.contains("tool_choice: auto"));
    }

    #[test]
    fn test_extract_json_balanced() {
        assert_eq!(extract_json("{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(
            extract_json("noise before {\"a\":{\"b\":2}} noise after"),
            Some("{\"a\":{\"b\":2}}")
        );
        // Braces inside strings don't unbalance.
        assert_eq!(
            extract_json(r#"{"text":"a } b { c"}"#),
            Some(r#"{"text":"a } b { c"}"#)
        );
        // Only the first object is used.
        assert_eq!(extract_json("{\"a\":1} {\"b\":2}"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{unclosed"), None);
    }

    #[test]
    fn test_parse_tool_calls() {
        let text = r#"{"opencode":{"tool_calls":[{"name":"ide.hover","arguments":{"uri":"a.ts","line":1,"character":0}}]}}"#;
        match parse_response(text) {
            ShimOutput::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "ide.hover");
                assert_eq!(calls[0].arguments["uri"], "a.ts");
            }
            other => panic!("Expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_camel_and_flat_spellings() {
        for key in ["toolCalls", "toolcalls"] {
            let text = format!(r#"{{"opencode":{{"{key}":[{{"name":"grep","arguments":{{}}}}]}}}}"#);
            assert!(matches!(
                parse_response(&text),
                ShimOutput::ToolCalls(calls) if calls[0].name == "grep"
            ));
        }
    }

    #[test]
    fn test_parse_final_shapes() {
        assert_eq!(
            parse_response(r#"{"opencode":{"final":"done"}}"#),
            ShimOutput::Final("done".to_string())
        );
        assert_eq!(
            parse_response(r#"{"content":"from content"}"#),
            ShimOutput::Final("from content".to_string())
        );
        assert_eq!(
            parse_response(r#"{"text":"from text"}"#),
            ShimOutput::Final("from text".to_string())
        );
    }

    #[test]
    fn test_parse_plain_text_fallback() {
        assert_eq!(
            parse_response("just words, no json"),
            ShimOutput::Final("just words, no json".to_string())
        );
        // Parseable JSON without any known shape: raw text comes back.
        assert_eq!(
            parse_response(r#"{"unrelated": 1}"#),
            ShimOutput::Final(r#"{"unrelated": 1}"#.to_string())
        );
    }

    #[test]
    fn test_arguments_default_to_empty_object() {
        let text = r#"{"opencode":{"tool_calls":[{"name":"list"}]}}"#;
        match parse_response(text) {
            ShimOutput::ToolCalls(calls) => {
                assert_eq!(calls[0].arguments, serde_json::json!({}));
            }
            other => panic!("Expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_shim_round_trip() {
        // Format a tool through the preamble, echo the documented shape
        // back, and confirm the parse yields that tool's name.
        let tool = hover_tool();
        let preamble = system_preamble(std::slice::from_ref(&tool), &ToolChoice::Auto);
        assert!(preamble.contains(&tool.name));

        let echoed = format!(
            r#"{{"opencode":{{"tool_calls":[{{"name":"{}","arguments":{{}}}}]}}}}"#,
            tool.name
        );
        match parse_response(&echoed) {
            ShimOutput::ToolCalls(calls) => assert_eq!(calls[0].name, tool.name),
            other => panic!("Expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_parts_from_tool_call_text() {
        let text = r#"{"opencode":{"tool_calls":[{"name":"ide.hover","arguments":{"uri":"a.ts","line":1,"character":0}}]}}"#;
        let parts = parts_from_text(text, Usage::new(1, 1));

        assert_eq!(parts.len(), 2);
        match &parts[0] {
            StreamPart::ToolCall { id, name, input } => {
                assert!(!id.is_empty());
                assert_eq!(name, "ide.hover");
                let args: Value = serde_json::from_str(input).unwrap();
                assert_eq!(args["line"], 1);
            }
            other => panic!("Expected tool call, got {other:?}"),
        }
        assert_eq!(
            parts[1],
            StreamPart::Finish {
                reason: FinishReason::ToolCalls,
                usage: Usage::new(1, 1),
            }
        );
    }

    #[test]
    fn test_parts_from_final_text() {
        let parts = parts_from_text(r#"{"opencode":{"final":"hello"}}"#, Usage::default());
        assert_eq!(parts.len(), 4);
        assert!(matches!(parts[0], StreamPart::TextStart { .. }));
        assert!(matches!(
            &parts[1],
            StreamPart::TextDelta { delta, .. } if delta == "hello"
        ));
        assert!(matches!(parts[2], StreamPart::TextEnd { .. }));
        assert!(matches!(
            parts[3],
            StreamPart::Finish {
                reason: FinishReason::Stop,
                ..
            }
        ));
    }

    #[test]
    fn test_fresh_uuid_per_call() {
        let text = r#"{"opencode":{"tool_calls":[{"name":"a","arguments":{}},{"name":"b","arguments":{}}]}}"#;
        let parts = parts_from_text(text, Usage::default());
        let ids: Vec<&String> = parts
            .iter()
            .filter_map(|p| match p {
                StreamPart::ToolCall { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
