//! Test-only helpers: task builders, stream frame builders, and scripted
//! tracker/agent collaborators.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::{Value, json};

use crate::control::{CancellationToken, StopFlag};
use crate::core::types::{Task, TaskStatus, TaskType};
use crate::error::{AgentError, TrackerError};
use crate::io::agent::{AgentRequest, AgentRunner};
use crate::io::tracker::{TaskQuery, Tracker, in_scope};

/// Open, unblocked task with deterministic defaults.
pub fn task(id: &str, priority: u8) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        task_type: TaskType::Task,
        status: TaskStatus::Open,
        priority,
        description: None,
        blocked_by: Vec::new(),
        blocks: Vec::new(),
        parent: None,
        labels: Vec::new(),
    }
}

pub fn blocked_task(id: &str, priority: u8, blockers: &[&str]) -> Task {
    Task {
        blocked_by: blockers.iter().map(|b| b.to_string()).collect(),
        ..task(id, priority)
    }
}

pub fn closed_task(id: &str) -> Task {
    Task {
        status: TaskStatus::Closed,
        ..task(id, 2)
    }
}

pub fn child_of(mut task: Task, parent: &str) -> Task {
    task.parent = Some(parent.to_string());
    task
}

/// One `assistant` frame with a single text block.
pub fn assistant_text(text: &str) -> String {
    json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]}
    })
    .to_string()
}

pub fn assistant_tool_use(name: &str, input: Value) -> String {
    json!({
        "type": "assistant",
        "message": {"content": [{"type": "tool_use", "id": "toolu_1", "name": name, "input": input}]}
    })
    .to_string()
}

pub fn user_tool_result(content: &str) -> String {
    json!({
        "type": "user",
        "message": {"content": [{"type": "tool_result", "tool_use_id": "toolu_1", "content": content}]}
    })
    .to_string()
}

pub fn result_frame(is_error: bool, duration_ms: u64, cost_usd: f64) -> String {
    json!({
        "type": "result",
        "is_error": is_error,
        "duration_ms": duration_ms,
        "total_cost_usd": cost_usd
    })
    .to_string()
}

/// How a scripted agent invocation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedExit {
    Success,
    Failure { code: i32, stderr: String },
    SpawnFailure,
}

/// One scripted agent invocation.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    /// Stdout lines, delivered one at a time with a trailing newline.
    pub lines: Vec<String>,
    pub exit: ScriptedExit,
    /// Request a graceful stop while running.
    pub stop: Option<StopFlag>,
    /// Fire the cancellation token after the output and report `Aborted`.
    pub cancel: bool,
}

impl ScriptedRun {
    pub fn success(lines: Vec<String>) -> Self {
        Self {
            lines,
            exit: ScriptedExit::Success,
            stop: None,
            cancel: false,
        }
    }

    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            lines: Vec::new(),
            exit: ScriptedExit::Failure {
                code,
                stderr: stderr.to_string(),
            },
            stop: None,
            cancel: false,
        }
    }
}

/// Agent runner that replays queued [`ScriptedRun`]s in order. When the queue
/// is empty, runs succeed without output.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    runs: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl AgentRunner for ScriptedAgent {
    fn run(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
        on_output: &mut dyn FnMut(&str),
    ) -> Result<(), AgentError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let run = self
            .runs
            .lock()
            .expect("runs lock")
            .pop_front()
            .unwrap_or_else(|| ScriptedRun::success(Vec::new()));

        let outcome = match run.exit {
            ScriptedExit::Success => Ok(()),
            ScriptedExit::Failure { code, stderr } => Err(AgentError::ProcessError {
                code: Some(code),
                detail: stderr,
            }),
            ScriptedExit::SpawnFailure => {
                return Err(AgentError::SpawnFailed {
                    program: "scripted-agent".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                });
            }
        };
        for line in &run.lines {
            on_output(&format!("{line}\n"));
        }
        if let Some(stop) = &run.stop {
            stop.request();
        }
        if run.cancel {
            cancel.cancel();
            return Err(AgentError::Aborted);
        }
        outcome
    }
}

/// In-memory tracker.
///
/// `list_tasks` pops queued snapshots in order and keeps returning the last
/// one once the queue is down to a single entry.
#[derive(Debug, Default)]
pub struct FakeTracker {
    snapshots: Mutex<VecDeque<Vec<Task>>>,
    blocked: Mutex<Vec<Task>>,
    query_failures: Mutex<VecDeque<String>>,
    fail_writes: Mutex<bool>,
    comments: Mutex<Vec<(String, String)>>,
    closed: Mutex<Vec<(String, String)>>,
    queries: Mutex<Vec<TaskQuery>>,
}

impl FakeTracker {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self::with_snapshots(vec![tasks])
    }

    pub fn with_snapshots(snapshots: Vec<Vec<Task>>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            ..Self::default()
        }
    }

    pub fn set_blocked(&self, blocked: Vec<Task>) {
        *self.blocked.lock().expect("blocked lock") = blocked;
    }

    /// Make the next `list_tasks` call fail with `CommandFailed`.
    pub fn fail_next_query(&self, detail: &str) {
        self.query_failures
            .lock()
            .expect("failures lock")
            .push_back(detail.to_string());
    }

    /// Make every comment and close call fail.
    pub fn fail_writes(&self) {
        *self.fail_writes.lock().expect("writes lock") = true;
    }

    pub fn comments(&self) -> Vec<(String, String)> {
        self.comments.lock().expect("comments lock").clone()
    }

    pub fn closed(&self) -> Vec<(String, String)> {
        self.closed.lock().expect("closed lock").clone()
    }

    pub fn queries(&self) -> Vec<TaskQuery> {
        self.queries.lock().expect("queries lock").clone()
    }

    fn check_write(&self, command: &str) -> Result<(), TrackerError> {
        if *self.fail_writes.lock().expect("writes lock") {
            return Err(TrackerError::CommandFailed {
                command: command.to_string(),
                detail: "write rejected".to_string(),
            });
        }
        Ok(())
    }
}

impl Tracker for FakeTracker {
    fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>, TrackerError> {
        self.queries
            .lock()
            .expect("queries lock")
            .push(query.clone());
        if let Some(detail) = self.query_failures.lock().expect("failures lock").pop_front() {
            return Err(TrackerError::CommandFailed {
                command: "bd list".to_string(),
                detail,
            });
        }
        let mut snapshots = self.snapshots.lock().expect("snapshots lock");
        let tasks = if snapshots.len() > 1 {
            snapshots.pop_front().unwrap_or_default()
        } else {
            snapshots.front().cloned().unwrap_or_default()
        };
        Ok(tasks
            .into_iter()
            .filter(|t| query.include_closed || !t.is_closed())
            .filter(|t| in_scope(t, query.parent.as_deref()))
            .collect())
    }

    fn list_blocked(&self, parent: Option<&str>) -> Result<Vec<Task>, TrackerError> {
        Ok(self
            .blocked
            .lock()
            .expect("blocked lock")
            .iter()
            .filter(|t| in_scope(t, parent))
            .cloned()
            .collect())
    }

    fn add_comment(&self, id: &str, body: &str) -> Result<(), TrackerError> {
        self.check_write("bd comments add")?;
        self.comments
            .lock()
            .expect("comments lock")
            .push((id.to_string(), body.to_string()));
        Ok(())
    }

    fn close(&self, id: &str, reason: &str) -> Result<(), TrackerError> {
        self.check_write("bd close")?;
        self.closed
            .lock()
            .expect("closed lock")
            .push((id.to_string(), reason.to_string()));
        Ok(())
    }
}
