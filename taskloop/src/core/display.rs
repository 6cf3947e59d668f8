//! Display projection of decoded stream messages.
//!
//! [`filter_for_display`] keeps the full narrative of assistant turns and the
//! session results, plus only the tool activity that follows the most recent
//! assistant turn. Every projected message is a single line of bounded length.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::types::{
    AssistantBlock, DisplayMessage, DisplaySource, ResultSummary, StreamMessage, ToolOutput,
    ToolResult,
};

/// Upper bound for any projected line.
pub const MAX_DISPLAY_CHARS: usize = 500;
/// Upper bound for the output shown for a single tool result.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 200;
/// Upper bound for each argument value in a tool invocation line.
pub const MAX_TOOL_VALUE_CHARS: usize = 60;
pub const TRUNCATION_MARKER: &str = "…";

const SUCCESS_GLYPH: &str = "✓";
const FAILURE_GLYPH: &str = "✗";

static LINE_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n\t]+").expect("line break pattern is valid"));

/// Select and format the messages worth showing to a human.
///
/// With `k` the index of the last assistant message: every assistant message,
/// every result message, and every message after `k`. Without any assistant
/// message, everything is shown. System frames never produce output.
pub fn filter_for_display(messages: &[StreamMessage]) -> Vec<DisplayMessage> {
    let last_assistant = messages.iter().rposition(StreamMessage::is_assistant);
    messages
        .iter()
        .enumerate()
        .filter(|(index, message)| match last_assistant {
            None => true,
            Some(k) => message.is_assistant() || message.is_result() || *index > k,
        })
        .filter_map(|(_, message)| format_message(message))
        .collect()
}

/// Format one message, or `None` if it has nothing to show.
pub fn format_message(message: &StreamMessage) -> Option<DisplayMessage> {
    let (source, content) = match message {
        StreamMessage::Assistant { blocks } => (DisplaySource::Assistant, format_assistant(blocks)),
        StreamMessage::User {
            results,
            raw_output,
        } => (DisplaySource::User, format_user(results, raw_output.as_ref())),
        StreamMessage::Result(summary) => (DisplaySource::Result, format_result(summary)),
        StreamMessage::System => return None,
    };
    let content = truncate(&one_line(&content), MAX_DISPLAY_CHARS);
    if content.is_empty() {
        return None;
    }
    Some(DisplayMessage::new(source, content))
}

fn format_assistant(blocks: &[AssistantBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            AssistantBlock::Text(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            AssistantBlock::ToolUse { name, input } => Some(format_tool_use(name, input)),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `[Name] key: value, key: value`
pub fn format_tool_use(name: &str, input: &Value) -> String {
    let args = match input {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("{key}: {}", summarize_value(value)))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => summarize_value(other),
    };
    if args.is_empty() {
        format!("[{name}]")
    } else {
        format!("[{name}] {args}")
    }
}

fn summarize_value(value: &Value) -> String {
    match value {
        Value::String(s) => truncate(&one_line(s), MAX_TOOL_VALUE_CHARS),
        Value::Array(items) => format!("[{} items]", items.len()),
        Value::Object(map) => format!("{{{} keys}}", map.len()),
        other => truncate(&other.to_string(), MAX_TOOL_VALUE_CHARS),
    }
}

fn format_user(results: &[ToolResult], raw_output: Option<&ToolOutput>) -> String {
    results
        .iter()
        .map(|result| {
            let (output, failed) = tool_outcome(result, raw_output);
            let glyph = if failed { FAILURE_GLYPH } else { SUCCESS_GLYPH };
            let output = one_line(output.trim());
            if output.is_empty() {
                format!("{glyph} (no output)")
            } else {
                format!("{glyph} {}", truncate(&output, MAX_TOOL_OUTPUT_CHARS))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Output text and failure classification for one tool result.
///
/// Raw stdout/stderr override the result content, and non-empty stderr means
/// failure whatever the declared error flag says.
fn tool_outcome(result: &ToolResult, raw_output: Option<&ToolOutput>) -> (String, bool) {
    let Some(raw) = raw_output else {
        return (result.content.clone(), result.is_error);
    };
    let stdout = raw.stdout.as_deref().map(str::trim).unwrap_or_default();
    let stderr = raw.stderr.as_deref().map(str::trim).unwrap_or_default();
    let output = [stdout, stderr]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (output, result.is_error || !stderr.is_empty())
}

fn format_result(summary: &ResultSummary) -> String {
    let mut line = if summary.is_error {
        format!("{FAILURE_GLYPH} Failed")
    } else {
        format!("{SUCCESS_GLYPH} Completed")
    };
    if let Some(ms) = summary.duration_ms {
        line.push_str(&format!(" in {:.1}s", ms as f64 / 1000.0));
    }
    if let Some(cost) = summary.cost_usd {
        line.push_str(&format!(", cost ${cost:.4}"));
    }
    line
}

/// Plain text of the assistant turns, for completion-signal detection.
///
/// Tool invocations appear as a short descriptive line.
pub fn extract_plain_text(messages: &[StreamMessage]) -> String {
    let mut lines = Vec::new();
    for message in messages {
        let StreamMessage::Assistant { blocks } = message else {
            continue;
        };
        for block in blocks {
            match block {
                AssistantBlock::Text(text) => lines.push(text.clone()),
                AssistantBlock::ToolUse { name, .. } => lines.push(format!("Using tool: {name}")),
            }
        }
    }
    lines.join("\n")
}

pub fn contains_sentinel(text: &str, sentinel: &str) -> bool {
    !sentinel.is_empty() && text.contains(sentinel)
}

/// Collapse line breaks and tabs so the text renders on a single line.
pub fn one_line(text: &str) -> String {
    LINE_BREAKS.replace_all(text, " ").into_owned()
}

/// Truncate to `max_chars` characters, appending a marker when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}
