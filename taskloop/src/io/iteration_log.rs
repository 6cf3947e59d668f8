//! Iteration logging helpers for `<log_dir>/<run-id>/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;

/// Summary written to `meta.json` after each agent invocation.
#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iteration: u32,
    /// `None` for the single-document workflow.
    pub task_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub sentinel_seen: bool,
    pub started_at_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub stream_path: PathBuf,
    pub meta_path: PathBuf,
}

impl IterationPaths {
    pub fn new(log_root: &Path, run_id: &str, iteration: u32) -> Self {
        let dir = log_root.join(run_id).join(iteration.to_string());
        Self {
            stream_path: dir.join("stream.jsonl"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

/// Identifier for one `run` invocation, stable for the life of the process.
pub fn new_run_id() -> String {
    format!("run-{}", unix_millis() / 1000)
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn write_meta(paths: &IterationPaths, meta: &IterationMeta) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;
    write_json(&paths.meta_path, meta)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
