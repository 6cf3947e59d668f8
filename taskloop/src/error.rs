//! Error taxonomy for the two collaborators the loop drives.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the issue-tracker collaborator.
///
/// Any of these is fatal when raised by the per-iteration task query.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The tracker store does not exist at all (as opposed to a failing query).
    #[error("issue tracker is not initialized in {}", .0.display())]
    NotInitialized(PathBuf),
    #[error("tracker command `{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("could not parse output of `{command}`")]
    ParseFailed {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of a single agent invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent `{program}`")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent failed ({}): {detail}", describe_exit(.code))]
    ProcessError { code: Option<i32>, detail: String },
    /// Immediate cancel was requested while the agent was running.
    #[error("agent run aborted")]
    Aborted,
}

impl AgentError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, AgentError::Aborted)
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
