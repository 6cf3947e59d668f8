//! Shared deterministic types for the loop core.
//!
//! These types are plain data. Tasks are immutable snapshots of tracker state;
//! stream messages are decoded protocol frames; display messages are the
//! human-facing projection of those frames.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Closed,
    /// Unknown tracker statuses are treated as open work.
    #[serde(other)]
    Open,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Bug,
    Feature,
    Epic,
    /// Unknown issue types are treated as plain tasks.
    #[serde(other)]
    Task,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Task => "task",
            TaskType::Bug => "bug",
            TaskType::Feature => "feature",
            TaskType::Epic => "epic",
        }
    }
}

/// A unit of trackable work, as reported by one tracker query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// 0 is the most urgent.
    pub priority: u8,
    pub description: Option<String>,
    /// Ids of not-yet-closed tasks preventing work on this one.
    pub blocked_by: Vec<String>,
    /// Reverse view of `blocked_by`. Informational only.
    pub blocks: Vec<String>,
    pub parent: Option<String>,
    pub labels: Vec<String>,
}

impl Task {
    pub fn is_closed(&self) -> bool {
        self.status == TaskStatus::Closed
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// One block of an assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantBlock {
    Text(String),
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
}

/// A tool result reported back to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

/// Raw stdout/stderr attached to a user frame by the agent CLI.
///
/// When present these take precedence over the `content` of the tool result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Final summary frame of an agent session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSummary {
    pub is_error: bool,
    pub duration_ms: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// A decoded, schema-valid protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Assistant {
        blocks: Vec<AssistantBlock>,
    },
    User {
        results: Vec<ToolResult>,
        raw_output: Option<ToolOutput>,
    },
    System,
    Result(ResultSummary),
}

impl StreamMessage {
    pub fn is_assistant(&self) -> bool {
        matches!(self, StreamMessage::Assistant { .. })
    }

    pub fn is_result(&self) -> bool {
        matches!(self, StreamMessage::Result(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplaySource {
    Assistant,
    User,
    Result,
    /// Notices produced by the loop itself rather than the agent.
    System,
}

/// Single-line, human-facing projection of a stream message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayMessage {
    pub source: DisplaySource,
    pub content: String,
}

impl DisplayMessage {
    pub fn new(source: DisplaySource, content: impl Into<String>) -> Self {
        Self {
            source,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_deserializes_as_open() {
        let status: TaskStatus = serde_json::from_str("\"deferred\"").expect("status");
        assert_eq!(status, TaskStatus::Open);
        let status: TaskStatus = serde_json::from_str("\"in_progress\"").expect("status");
        assert_eq!(status, TaskStatus::InProgress);
        let status: TaskStatus = serde_json::from_str("\"open\"").expect("status");
        assert_eq!(status, TaskStatus::Open);
    }

    #[test]
    fn unknown_issue_type_deserializes_as_task() {
        let kind: TaskType = serde_json::from_str("\"chore\"").expect("type");
        assert_eq!(kind, TaskType::Task);
        let kind: TaskType = serde_json::from_str("\"epic\"").expect("type");
        assert_eq!(kind, TaskType::Epic);
    }
}
