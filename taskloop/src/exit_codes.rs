//! Stable exit codes for taskloop CLI commands.

use crate::events::RunStop;

/// Every requested iteration ran, or `next` found a ready task.
pub const OK: i32 = 0;
/// Invalid config, tracker failure, or any other error.
pub const ERROR: i32 = 1;
/// Batch complete: every task in scope is closed or blocked.
pub const COMPLETE: i32 = 2;
/// Ready work remains but all of it is reserved for manual handling.
pub const NO_SELECTABLE: i32 = 3;
/// Stopped by the user (Ctrl-C).
pub const STOPPED: i32 = 130;

/// Exit code for a finished `taskloop run`.
pub fn for_stop(stop: &RunStop) -> i32 {
    match stop {
        RunStop::Finished => OK,
        RunStop::BatchComplete { .. } => COMPLETE,
        RunStop::NoReadyTasks => NO_SELECTABLE,
        RunStop::Stopped { .. } => STOPPED,
        RunStop::Errored { .. } => ERROR,
    }
}
