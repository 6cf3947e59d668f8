//! Deterministic readiness and selection logic over a task snapshot.
//!
//! The snapshot is trusted completely: a task's readiness depends only on its
//! own `blocked_by` list, never on the status of the blockers it names. A
//! blocker closed since the snapshot was taken is discovered on the next query.

use crate::core::types::Task;

/// A task is ready iff it is not closed and has no outstanding blockers.
pub fn is_ready(task: &Task) -> bool {
    !task.is_closed() && task.blocked_by.is_empty()
}

/// A task that is neither closed nor ready.
pub fn is_blocked(task: &Task) -> bool {
    !task.is_closed() && !task.blocked_by.is_empty()
}

/// Pick the most urgent ready task.
///
/// Ties on priority keep the input order (stable sort). The tracker's result
/// order is the only tie-break, and it carries no stronger guarantee than that.
pub fn find_next_ready(tasks: &[Task]) -> Option<&Task> {
    let mut ready: Vec<&Task> = tasks.iter().filter(|task| is_ready(task)).collect();
    ready.sort_by_key(|task| task.priority);
    ready.into_iter().next()
}

/// Tasks automated selection may consider: those without the reserved label.
pub fn selectable(tasks: &[Task], manual_label: &str) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| !task.has_label(manual_label))
        .cloned()
        .collect()
}

/// True iff no further unattended progress is possible: the set is empty, or
/// every task is closed or blocked.
pub fn is_batch_complete(tasks: &[Task]) -> bool {
    tasks.iter().all(|task| task.is_closed() || is_blocked(task))
}

/// True iff every task in the set is closed.
pub fn all_closed(tasks: &[Task]) -> bool {
    tasks.iter().all(Task::is_closed)
}
