//! Incremental decoder for the agent's newline-delimited JSON stream.
//!
//! The decoder is a pure function over an explicit [`DecoderState`]: the caller
//! threads the state from one chunk to the next. Chunk boundaries never affect
//! the decoded sequence; a trailing partial line is held until its newline
//! arrives (or until [`finish`] is called at end of stream).
//!
//! Frames are accepted only when they match the minimal shape of their declared
//! `type`. Anything else, including unrelated JSON that happens to carry a
//! `type` key, is dropped without error.

use serde::Deserialize;
use serde_json::Value;

use crate::core::types::{AssistantBlock, ResultSummary, StreamMessage, ToolOutput, ToolResult};

/// Partial-line state carried between chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderState {
    pub pending: String,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Decode one chunk, returning the new state and any complete frames.
pub fn decode_chunk(state: DecoderState, chunk: &str) -> (DecoderState, Vec<StreamMessage>) {
    let mut buffer = state.pending;
    buffer.push_str(chunk);

    let Some(last_newline) = buffer.rfind('\n') else {
        return (DecoderState { pending: buffer }, Vec::new());
    };

    let pending = buffer[last_newline + 1..].to_string();
    let messages = buffer[..last_newline].lines().filter_map(decode_line).collect();
    (DecoderState { pending }, messages)
}

/// Flush the trailing unterminated line at end of stream.
pub fn finish(state: DecoderState) -> Vec<StreamMessage> {
    decode_line(&state.pending).into_iter().collect()
}

/// Decode a complete text in one pass.
pub fn decode_all(text: &str) -> Vec<StreamMessage> {
    let (state, mut messages) = decode_chunk(DecoderState::new(), text);
    messages.extend(finish(state));
    messages
}

/// Decode a single line. Blank, non-JSON and mis-shaped lines yield `None`.
pub fn decode_line(line: &str) -> Option<StreamMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let frame: WireFrame = serde_json::from_str(line).ok()?;
    Some(frame.into_message())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireFrame {
    Assistant {
        message: WireMessage,
    },
    User {
        message: WireMessage,
        #[serde(default)]
        tool_use_result: Option<Value>,
    },
    System {},
    /// Optional fields are read leniently; a mistyped one reads as absent.
    Result {
        #[serde(default)]
        is_error: Option<Value>,
        #[serde(default)]
        duration_ms: Option<Value>,
        #[serde(default)]
        cost_usd: Option<Value>,
        #[serde(default)]
        total_cost_usd: Option<Value>,
    },
}

/// Only `content` must be a list; its blocks are decoded one at a time.
#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

impl WireMessage {
    /// Blocks that match their declared shape; mis-shaped ones are dropped.
    fn blocks(self) -> impl Iterator<Item = WireBlock> {
        self.content
            .into_iter()
            .filter_map(|block| serde_json::from_value(block).ok())
    }
}

impl WireFrame {
    fn into_message(self) -> StreamMessage {
        match self {
            WireFrame::Assistant { message } => StreamMessage::Assistant {
                blocks: message
                    .blocks()
                    .filter_map(|block| match block {
                        WireBlock::Text { text } => Some(AssistantBlock::Text(text)),
                        WireBlock::ToolUse { name, input } => {
                            Some(AssistantBlock::ToolUse { name, input })
                        }
                        WireBlock::ToolResult { .. } | WireBlock::Other => None,
                    })
                    .collect(),
            },
            WireFrame::User {
                message,
                tool_use_result,
            } => StreamMessage::User {
                results: message
                    .blocks()
                    .filter_map(|block| match block {
                        WireBlock::ToolResult { content, is_error } => Some(ToolResult {
                            content: content_text(&content),
                            is_error: is_error.unwrap_or(false),
                        }),
                        _ => None,
                    })
                    .collect(),
                raw_output: tool_use_result.as_ref().and_then(tool_output),
            },
            WireFrame::System {} => StreamMessage::System,
            WireFrame::Result {
                is_error,
                duration_ms,
                cost_usd,
                total_cost_usd,
            } => StreamMessage::Result(ResultSummary {
                is_error: is_error.as_ref().and_then(Value::as_bool).unwrap_or(false),
                duration_ms: duration_ms.as_ref().and_then(millis),
                cost_usd: total_cost_usd
                    .as_ref()
                    .and_then(Value::as_f64)
                    .or_else(|| cost_usd.as_ref().and_then(Value::as_f64)),
            }),
        }
    }
}

/// Whole or fractional milliseconds; fractions are truncated.
fn millis(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| ms as u64)
    })
}

/// Tool result content is either a string or a list of text blocks.
fn content_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map.get("text").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn tool_output(value: &Value) -> Option<ToolOutput> {
    let map = value.as_object()?;
    let stdout = map.get("stdout").and_then(Value::as_str).map(str::to_string);
    let stderr = map.get("stderr").and_then(Value::as_str).map(str::to_string);
    if stdout.is_none() && stderr.is_none() {
        return None;
    }
    Some(ToolOutput { stdout, stderr })
}
