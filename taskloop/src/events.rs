//! Events emitted by the orchestrator and the terminal states of a run.
//!
//! A run produces an ordered sequence of [`RunEvent`]s on a channel, always
//! ending with [`RunEvent::RunEnded`]. A single listener can render or record
//! the sequence.

use crate::core::types::DisplayMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    IterationStarted {
        iteration: u32,
        total: u32,
    },
    TaskStarted {
        id: String,
        title: String,
    },
    /// New agent output.
    Output {
        /// Frames decoded since the previous output event, formatted.
        appended: Vec<DisplayMessage>,
        /// The current filtered view of this iteration's output. Replaces any
        /// earlier view from the same iteration.
        view: Vec<DisplayMessage>,
    },
    TaskCompleted {
        /// `None` when the agent chose its own work (legacy document).
        id: Option<String>,
        success: bool,
        error: Option<String>,
    },
    IterationCompleted {
        iteration: u32,
        total: u32,
    },
    RunEnded(RunOutcome),
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every requested iteration ran.
    Finished,
    /// No further unattended progress is possible in scope.
    BatchComplete {
        /// Every task is closed, as opposed to the rest being blocked.
        all_closed: bool,
        /// Parent scope closed automatically, if any.
        closed_scope: Option<String>,
    },
    /// Ready work exists but none of it may be picked automatically.
    NoReadyTasks,
    Stopped {
        /// Immediate cancel (true) or graceful stop (false).
        immediate: bool,
    },
    Errored {
        message: String,
    },
}

impl RunStop {
    /// Short human-readable reason for display.
    pub fn reason(&self) -> String {
        match self {
            RunStop::Finished => "All iterations completed".to_string(),
            RunStop::BatchComplete {
                all_closed: true, ..
            } => "All tasks complete".to_string(),
            RunStop::BatchComplete {
                all_closed: false, ..
            } => "No ready tasks (all blocked)".to_string(),
            RunStop::NoReadyTasks => {
                "No ready tasks (remaining work is reserved for manual handling)".to_string()
            }
            RunStop::Stopped { immediate: true } => "Stopped by user".to_string(),
            RunStop::Stopped { immediate: false } => {
                "Stopped by user after current iteration".to_string()
            }
            RunStop::Errored { message } => format!("Error: {message}"),
        }
    }
}

/// Summary returned by the orchestrator and carried by [`RunEvent::RunEnded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub iterations_requested: u32,
    pub iterations_completed: u32,
    pub stop: RunStop,
}
