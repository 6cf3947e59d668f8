//! Child process runner with incremental stdout delivery and preemptive kill.
//!
//! Stdout is read line by line on a dedicated thread and handed to the caller
//! as soon as each line arrives. Stderr is drained concurrently (bounded) so
//! the child can never block on a full pipe. The calling thread waits on the
//! child and observes the cancellation token at every poll tick; a cancel
//! kills the child rather than waiting for it to notice.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::control::CancellationToken;

/// Exit information for a streamed child process.
#[derive(Debug)]
pub struct StreamedExit {
    pub status: ExitStatus,
    pub stderr: Vec<u8>,
    pub stderr_truncated: usize,
    /// The child was killed because cancellation was requested.
    pub killed: bool,
}

impl StreamedExit {
    pub fn stderr_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if self.stderr_truncated > 0 {
            text.push_str(&format!(" [stderr truncated {} bytes]", self.stderr_truncated));
        }
        text
    }
}

/// Options for [`stream_child`].
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions<'a> {
    pub poll_interval: Duration,
    pub stderr_limit_bytes: usize,
    /// Tee every stdout line to this file, flushed per line.
    pub tee_path: Option<&'a Path>,
}

/// Spawn `cmd` with stdin closed and stdout/stderr piped.
pub fn spawn_piped(mut cmd: Command) -> std::io::Result<Child> {
    debug!("spawning child process");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

/// Deliver the stdout of a [`spawn_piped`] child to `on_line` as it is produced.
///
/// A non-zero exit is not an error here; inspect `StreamedExit::status`. A tee
/// file that cannot be created is logged and skipped.
#[instrument(skip_all, fields(pid = child.id(), poll_ms = options.poll_interval.as_millis() as u64, tee = options.tee_path.is_some()))]
pub fn stream_child(
    mut child: Child,
    options: StreamOptions<'_>,
    cancel: &CancellationToken,
    on_line: &mut dyn FnMut(&str),
) -> Result<StreamedExit> {
    let mut tee = options.tee_path.and_then(|path| match open_tee(path) {
        Ok(writer) => Some(writer),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "stream log disabled");
            None
        }
    });

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    // Detached: after a kill, a grandchild may keep the pipe open.
    thread::spawn(move || forward_lines(stdout, tx));
    let limit = options.stderr_limit_bytes;
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let mut killed = false;
    loop {
        if cancel.is_cancelled() {
            kill_child(&mut child)?;
            killed = true;
            break;
        }
        match rx.recv_timeout(options.poll_interval) {
            Ok(line) => {
                if let Some(writer) = tee.as_mut() {
                    write_tee_line(writer, &line);
                }
                on_line(&String::from_utf8_lossy(&line));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = wait_child(&mut child, options.poll_interval, cancel, &mut killed)?;

    let (stderr, stderr_truncated) = if killed {
        // The stderr pipe may outlive the child; do not wait on it.
        (Vec::new(), 0)
    } else {
        join_output(stderr_handle).context("join stderr")?
    };
    if stderr_truncated > 0 {
        warn!(stderr_truncated, "stderr truncated");
    }

    debug!(exit_code = ?status.code(), killed, "command finished");
    Ok(StreamedExit {
        status,
        stderr,
        stderr_truncated,
        killed,
    })
}

/// Wait for exit, killing the child if cancellation arrives meanwhile.
fn wait_child(
    child: &mut Child,
    poll_interval: Duration,
    cancel: &CancellationToken,
    killed: &mut bool,
) -> Result<ExitStatus> {
    loop {
        if let Some(status) = child
            .wait_timeout(poll_interval)
            .context("wait for command")?
        {
            return Ok(status);
        }
        if cancel.is_cancelled() && !*killed {
            kill_child(child)?;
            *killed = true;
        }
    }
}

fn kill_child(child: &mut Child) -> Result<()> {
    warn!(pid = child.id(), "cancellation requested, killing child");
    match child.kill() {
        Ok(()) => Ok(()),
        // Already exited between the last poll and the kill.
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err).context("kill command"),
    }
}

fn forward_lines<R: Read>(reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(err = %err, "failed to read stdout");
                break;
            }
        }
    }
}

fn open_tee(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("create stream file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write_tee_line(writer: &mut BufWriter<File>, line: &[u8]) {
    // Flush per line for real-time visibility.
    if let Err(e) = writer.write_all(line) {
        warn!(err = %e, "failed to write to stream file");
    } else if let Err(e) = writer.flush() {
        warn!(err = %e, "failed to flush stream file");
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
