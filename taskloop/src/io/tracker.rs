//! Issue-tracker collaborator.
//!
//! The [`Tracker`] trait is the only way the loop reads or changes tracker
//! state. [`BeadsTracker`] drives the `bd` CLI with `--json` output and maps
//! its records onto [`Task`] snapshots.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::types::{Task, TaskStatus, TaskType};
use crate::error::TrackerError;

/// Directory whose presence marks an initialized beads store.
pub const BEADS_DIR: &str = ".beads";
const DEFAULT_PRIORITY: u8 = 2;

/// Filter for [`Tracker::list_tasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    /// Only children of this task.
    pub parent: Option<String>,
    /// Include closed tasks in the result.
    pub include_closed: bool,
}

/// Request/response interface to the issue tracker.
pub trait Tracker {
    fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>, TrackerError>;

    /// Tasks currently blocked, optionally restricted to children of `parent`.
    fn list_blocked(&self, parent: Option<&str>) -> Result<Vec<Task>, TrackerError>;

    fn add_comment(&self, id: &str, body: &str) -> Result<(), TrackerError>;

    fn close(&self, id: &str, reason: &str) -> Result<(), TrackerError>;
}

/// Tracker backed by the `bd` (beads) CLI.
#[derive(Debug, Clone)]
pub struct BeadsTracker {
    program: String,
    workdir: PathBuf,
}

impl BeadsTracker {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
        }
    }

    /// `bd` finds its store in the workdir or any ancestor of it.
    fn ensure_initialized(&self) -> Result<(), TrackerError> {
        if has_store(&self.workdir) {
            return Ok(());
        }
        Err(TrackerError::NotInitialized(self.workdir.clone()))
    }

    /// Run `bd <args>` and return its stdout.
    fn run(&self, args: &[&str]) -> Result<String, TrackerError> {
        self.ensure_initialized()?;
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(%command, "running tracker command");

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|err| TrackerError::CommandFailed {
                command: command.clone(),
                detail: err.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if looks_uninitialized(&stderr) {
                return Err(TrackerError::NotInitialized(self.workdir.clone()));
            }
            warn!(%command, exit_code = ?output.status.code(), "tracker command failed");
            return Err(TrackerError::CommandFailed {
                command,
                detail: if stderr.is_empty() {
                    format!("exit status {:?}", output.status.code())
                } else {
                    stderr
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Tracker for BeadsTracker {
    #[instrument(skip_all, fields(parent = ?query.parent, include_closed = query.include_closed))]
    fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>, TrackerError> {
        let mut args = vec!["list", "--json"];
        if query.include_closed {
            args.push("--all");
        }
        if let Some(parent) = query.parent.as_deref() {
            args.extend(["--parent", parent]);
        }
        let stdout = self.run(&args)?;
        let tasks = parse_tasks(&format!("{} list", self.program), &stdout)?;
        Ok(tasks
            .into_iter()
            .filter(|task| query.include_closed || !task.is_closed())
            .filter(|task| in_scope(task, query.parent.as_deref()))
            .collect())
    }

    #[instrument(skip_all, fields(parent = ?parent))]
    fn list_blocked(&self, parent: Option<&str>) -> Result<Vec<Task>, TrackerError> {
        let stdout = self.run(&["blocked", "--json"])?;
        let tasks = parse_tasks(&format!("{} blocked", self.program), &stdout)?;
        Ok(tasks
            .into_iter()
            .filter(|task| in_scope(task, parent))
            .collect())
    }

    fn add_comment(&self, id: &str, body: &str) -> Result<(), TrackerError> {
        self.run(&["comments", "add", id, body]).map(|_| ())
    }

    fn close(&self, id: &str, reason: &str) -> Result<(), TrackerError> {
        self.run(&["close", id, "--reason", reason]).map(|_| ())
    }
}

/// The tracker already filters by `--parent`, and its records often omit the
/// parent field. Only a record naming a different parent is out of scope.
pub fn in_scope(task: &Task, parent: Option<&str>) -> bool {
    match (parent, task.parent.as_deref()) {
        (Some(scope), Some(own)) => own == scope,
        _ => true,
    }
}

fn looks_uninitialized(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no beads database") || stderr.contains("not initialized")
}

/// Parse a JSON array of tracker records. Empty output means no tasks.
pub fn parse_tasks(command: &str, json: &str) -> Result<Vec<Task>, TrackerError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let records: Vec<TaskRecord> =
        serde_json::from_str(json).map_err(|source| TrackerError::ParseFailed {
            command: command.to_string(),
            source,
        })?;
    Ok(records.into_iter().map(TaskRecord::into_task).collect())
}

/// Wire shape of one tracker record.
#[derive(Debug, Deserialize)]
struct TaskRecord {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    issue_type: Option<TaskType>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    labels: Option<Vec<String>>,
    #[serde(default)]
    blocked_by: Option<Vec<String>>,
    #[serde(default)]
    blocks: Option<Vec<String>>,
    #[serde(default)]
    dependencies: Option<Vec<DependencyRecord>>,
}

#[derive(Debug, Deserialize)]
struct DependencyRecord {
    #[serde(alias = "depends_on_id")]
    id: String,
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default, alias = "type")]
    dependency_type: Option<String>,
}

impl DependencyRecord {
    fn is(&self, kind: &str) -> bool {
        self.dependency_type.as_deref() == Some(kind)
    }
}

impl TaskRecord {
    fn into_task(self) -> Task {
        let dependencies = self.dependencies.unwrap_or_default();
        let blocked_by = self.blocked_by.unwrap_or_else(|| {
            dependencies
                .iter()
                .filter(|dep| dep.is("blocks") && dep.status != Some(TaskStatus::Closed))
                .map(|dep| dep.id.clone())
                .collect()
        });
        let parent = self.parent.or_else(|| {
            dependencies
                .iter()
                .find(|dep| dep.is("parent-child"))
                .map(|dep| dep.id.clone())
        });
        Task {
            id: self.id,
            title: self.title,
            task_type: self.issue_type.unwrap_or(TaskType::Task),
            status: self.status.unwrap_or(TaskStatus::Open),
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            description: self.description.filter(|d| !d.trim().is_empty()),
            blocked_by,
            blocks: self.blocks.unwrap_or_default(),
            parent,
            labels: self.labels.unwrap_or_default(),
        }
    }
}

fn has_store(dir: &Path) -> bool {
    dir.ancestors().any(|dir| dir.join(BEADS_DIR).is_dir())
}
