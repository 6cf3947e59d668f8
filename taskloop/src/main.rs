//! Unattended coding-agent loop over an issue-tracker backlog.
//!
//! `taskloop run` works through ready tasks one agent invocation at a time;
//! `taskloop next` prints the task the next iteration would pick.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};

use taskloop::control::RunControl;
use taskloop::core::types::{DisplayMessage, DisplaySource};
use taskloop::events::RunEvent;
use taskloop::exit_codes;
use taskloop::io::agent::CommandAgentRunner;
use taskloop::io::config::{DEFAULT_CONFIG_PATH, LoopConfig, load_config};
use taskloop::io::prompt::PromptBuilder;
use taskloop::io::tracker::BeadsTracker;
use taskloop::logging;
use taskloop::orchestrator::Orchestrator;
use taskloop::select::{SelectOutcome, query_snapshot, select_next};
use taskloop::workflow::{LegacyDocument, TrackerScope, Workflow};

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Run a coding agent over an issue-tracker backlog, one task per iteration"
)]
struct Cli {
    /// Config file, relative to the working directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run up to N iterations. Ctrl-C once stops after the current iteration;
    /// twice aborts the running agent.
    Run {
        /// Maximum number of iterations.
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: u32,
        /// Only work on children of this task.
        #[arg(long, conflicts_with = "legacy")]
        epic: Option<String>,
        /// Work from a single backlog document instead of the tracker.
        #[arg(long, value_name = "PATH")]
        legacy: Option<PathBuf>,
    },
    /// Print the id of the next ready task.
    Next {
        /// Only consider children of this task.
        #[arg(long)]
        epic: Option<String>,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let workdir = std::env::current_dir().context("resolve working directory")?;
    let config = load_config(&workdir.join(&cli.config))?;
    match cli.command {
        Command::Run {
            iterations,
            epic,
            legacy,
        } => cmd_run(&workdir, &config, workflow_for(epic, legacy), iterations),
        Command::Next { epic } => cmd_next(&workdir, &config, epic),
    }
}

fn workflow_for(epic: Option<String>, legacy: Option<PathBuf>) -> Workflow {
    match (legacy, epic) {
        (Some(path), _) => Workflow::LegacyDocument(LegacyDocument { path }),
        (None, Some(epic)) => Workflow::TrackerBacked(TrackerScope::under(epic)),
        (None, None) => Workflow::TrackerBacked(TrackerScope::all()),
    }
}

fn cmd_run(workdir: &Path, config: &LoopConfig, workflow: Workflow, iterations: u32) -> Result<i32> {
    if let Workflow::LegacyDocument(document) = &workflow {
        let path = workdir.join(&document.path);
        if !path.is_file() {
            bail!("backlog document {} not found", path.display());
        }
    }

    let tracker = BeadsTracker::new(&config.tracker.command, workdir);
    let agent = CommandAgentRunner::from_config(config);
    let prompts = PromptBuilder::from_config(config, workdir)?;
    let control = RunControl::new();
    install_interrupt_handler(&control)?;

    let orchestrator = Orchestrator::new(&tracker, &agent, &prompts, config, workdir);
    let (tx, rx) = mpsc::channel();
    let workflow = &workflow;
    let worker_control = &control;
    let outcome = thread::scope(|scope| {
        let worker =
            scope.spawn(move || orchestrator.run(workflow, iterations, worker_control, &tx));
        // Ends when the worker drops its sender.
        for event in rx {
            for line in render_event(&event) {
                println!("{line}");
            }
        }
        worker.join()
    })
    .map_err(|_| anyhow!("run loop panicked"))?;

    Ok(exit_codes::for_stop(&outcome.stop))
}

fn cmd_next(workdir: &Path, config: &LoopConfig, epic: Option<String>) -> Result<i32> {
    let tracker = BeadsTracker::new(&config.tracker.command, workdir);
    let scope = epic.map(TrackerScope::under).unwrap_or_default();
    let tasks = query_snapshot(&tracker, &scope).context("query tasks")?;
    match select_next(&tasks, &config.manual_label) {
        SelectOutcome::Ready(task) => {
            println!("{}", task.id);
            Ok(exit_codes::OK)
        }
        SelectOutcome::Exhausted { all_closed: true } => {
            eprintln!("all tasks closed");
            Ok(exit_codes::COMPLETE)
        }
        SelectOutcome::Exhausted { all_closed: false } => {
            eprintln!("no ready tasks (all blocked)");
            Ok(exit_codes::COMPLETE)
        }
        SelectOutcome::NothingSelectable => {
            eprintln!("no ready tasks without the `{}` label", config.manual_label);
            Ok(exit_codes::NO_SELECTABLE)
        }
    }
}

/// First Ctrl-C: graceful stop. Any further Ctrl-C: immediate cancel.
fn install_interrupt_handler(control: &RunControl) -> Result<()> {
    let control = control.clone();
    let presses = AtomicU32::new(0);
    ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!("\nstopping after the current iteration (Ctrl-C again to abort)");
            control.stop_after_current();
        } else {
            eprintln!("\naborting");
            control.cancel_now();
        }
    })
    .context("install Ctrl-C handler")
}

/// Plain-text lines for one event.
fn render_event(event: &RunEvent) -> Vec<String> {
    match event {
        RunEvent::IterationStarted { iteration, total } => {
            vec![String::new(), format!("=== iteration {iteration}/{total} ===")]
        }
        RunEvent::TaskStarted { id, title } => vec![format!("> {id}: {title}")],
        RunEvent::Output { appended, .. } => appended.iter().map(render_message).collect(),
        RunEvent::TaskCompleted {
            id,
            success: true,
            ..
        } => vec![format!("done {}", id.as_deref().unwrap_or("iteration"))],
        RunEvent::TaskCompleted {
            id,
            success: false,
            error,
        } => vec![format!(
            "failed {}: {}",
            id.as_deref().unwrap_or("iteration"),
            error.as_deref().unwrap_or("unknown error")
        )],
        RunEvent::IterationCompleted { .. } => Vec::new(),
        RunEvent::RunEnded(outcome) => vec![
            String::new(),
            format!(
                "{} ({}/{} iterations)",
                outcome.stop.reason(),
                outcome.iterations_completed,
                outcome.iterations_requested
            ),
        ],
    }
}

fn render_message(message: &DisplayMessage) -> String {
    let prefix = match message.source {
        DisplaySource::Assistant => "agent",
        DisplaySource::User => "tool",
        DisplaySource::Result => "result",
        DisplaySource::System => "loop",
    };
    format!("[{prefix}] {}", message.content)
}
