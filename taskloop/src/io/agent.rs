//! Agent runner abstraction for one agent invocation.
//!
//! The [`AgentRunner`] trait decouples the orchestrator from the actual agent
//! backend. [`CommandAgentRunner`] spawns a CLI agent with the prompt as its
//! final argument; tests use scripted runners that replay canned output.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::control::CancellationToken;
use crate::error::AgentError;
use crate::io::config::LoopConfig;
use crate::io::process::{StreamOptions, spawn_piped, stream_child};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt passed as the final command-line argument.
    pub prompt: String,
    /// Where to tee raw stdout, if iteration logging is enabled.
    pub stream_log_path: Option<PathBuf>,
}

/// Abstraction over agent backends.
pub trait AgentRunner {
    /// Run the agent to completion, passing stdout text to `on_output` as it
    /// arrives. Returns `Err(AgentError::Aborted)` if `cancel` fired.
    fn run(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
        on_output: &mut dyn FnMut(&str),
    ) -> Result<(), AgentError>;
}

/// Agent runner that spawns a configured CLI (by default `claude`).
#[derive(Debug, Clone)]
pub struct CommandAgentRunner {
    program: String,
    args: Vec<String>,
    poll_interval: Duration,
    stderr_limit_bytes: usize,
}

impl CommandAgentRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            poll_interval: Duration::from_millis(100),
            stderr_limit_bytes: 100_000,
        }
    }

    pub fn from_config(cfg: &LoopConfig) -> Self {
        Self {
            program: cfg.agent.command.clone(),
            args: cfg.agent.args.clone(),
            poll_interval: cfg.poll_interval(),
            stderr_limit_bytes: cfg.stderr_limit_bytes,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl AgentRunner for CommandAgentRunner {
    #[instrument(skip_all, fields(program = %self.program, workdir = %request.workdir.display()))]
    fn run(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
        on_output: &mut dyn FnMut(&str),
    ) -> Result<(), AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Aborted);
        }
        info!(prompt_bytes = request.prompt.len(), "starting agent");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&request.prompt)
            .current_dir(&request.workdir);
        // Own process group: a terminal Ctrl-C must reach only us, so that a
        // graceful stop lets the agent finish.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = spawn_piped(cmd).map_err(|source| AgentError::SpawnFailed {
            program: self.program.clone(),
            source,
        })?;

        let exit = stream_child(
            child,
            StreamOptions {
                poll_interval: self.poll_interval,
                stderr_limit_bytes: self.stderr_limit_bytes,
                tee_path: request.stream_log_path.as_deref(),
            },
            cancel,
            on_output,
        )
        .map_err(|err| AgentError::ProcessError {
            code: None,
            detail: format!("{err:#}"),
        })?;

        if exit.killed {
            warn!("agent killed on cancel");
            return Err(AgentError::Aborted);
        }
        if !exit.status.success() {
            let stderr = exit.stderr_text();
            warn!(exit_code = ?exit.status.code(), "agent failed");
            return Err(AgentError::ProcessError {
                code: exit.status.code(),
                detail: if stderr.is_empty() {
                    "no stderr output".to_string()
                } else {
                    stderr
                },
            });
        }

        debug!("agent completed successfully");
        Ok(())
    }
}
