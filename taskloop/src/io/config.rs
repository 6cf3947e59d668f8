//! Loop configuration stored under `.taskloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = ".taskloop/config.toml";

/// Loop configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Token the agent prints when all assigned work is finished.
    pub completion_sentinel: String,

    /// Tasks carrying this label are never selected automatically.
    pub manual_label: String,

    /// Close the parent scope once every task under it is closed.
    pub auto_close_scope: bool,

    /// How often the process wait loop observes an immediate cancel.
    pub poll_interval_ms: u64,

    /// Truncate captured agent stderr beyond this many bytes.
    pub stderr_limit_bytes: usize,

    /// Write `stream.jsonl` and `meta.json` for every iteration.
    pub log_iterations: bool,

    /// Root directory for iteration logs, relative to the working directory.
    pub log_dir: PathBuf,

    pub agent: AgentConfig,
    pub tracker: TrackerConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable.
    pub command: String,
    /// Arguments placed before the prompt, which is always the last argument.
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: [
                "--print",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Issue tracker CLI executable.
    pub command: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            command: "bd".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Optional minijinja template replacing the built-in task prompt.
    pub template: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            completion_sentinel: "<promise>COMPLETE</promise>".to_string(),
            manual_label: "manual".to_string(),
            auto_close_scope: true,
            poll_interval_ms: 100,
            stderr_limit_bytes: 100_000,
            log_iterations: true,
            log_dir: PathBuf::from(".taskloop/iterations"),
            agent: AgentConfig::default(),
            tracker: TrackerConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.completion_sentinel.trim().is_empty() {
            return Err(anyhow!("completion_sentinel must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.stderr_limit_bytes == 0 {
            return Err(anyhow!("stderr_limit_bytes must be > 0"));
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must not be empty"));
        }
        if self.tracker.command.trim().is_empty() {
            return Err(anyhow!("tracker.command must not be empty"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
