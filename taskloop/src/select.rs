//! Selection helpers for `taskloop next` and the tracker-backed run loop.

use tracing::debug;

use crate::core::selector::{all_closed, find_next_ready, is_batch_complete, selectable};
use crate::core::types::Task;
use crate::error::TrackerError;
use crate::io::tracker::{TaskQuery, Tracker};
use crate::workflow::TrackerScope;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Most urgent ready task.
    Ready(Task),
    /// Every task in scope is closed or blocked.
    Exhausted { all_closed: bool },
    /// Ready work exists, but all of it carries the reserved label.
    NothingSelectable,
}

/// Query one snapshot of the tasks in `scope`, closed ones included.
///
/// Blockers reported only by the tracker's blocked listing are merged into
/// tasks whose own record names none.
pub fn query_snapshot(
    tracker: &dyn Tracker,
    scope: &TrackerScope,
) -> Result<Vec<Task>, TrackerError> {
    let mut tasks = tracker.list_tasks(&TaskQuery {
        parent: scope.parent.clone(),
        include_closed: true,
    })?;
    let blocked = tracker.list_blocked(scope.parent.as_deref())?;
    merge_blocked(&mut tasks, &blocked);
    debug!(
        tasks = tasks.len(),
        blocked = blocked.len(),
        "queried task snapshot"
    );
    Ok(tasks)
}

fn merge_blocked(tasks: &mut [Task], blocked: &[Task]) {
    for task in tasks.iter_mut().filter(|t| t.blocked_by.is_empty()) {
        if let Some(record) = blocked.iter().find(|b| b.id == task.id) {
            task.blocked_by = record.blocked_by.clone();
        }
    }
}

/// Decide what to do next with a snapshot.
pub fn select_next(tasks: &[Task], manual_label: &str) -> SelectOutcome {
    let candidates = selectable(tasks, manual_label);
    if let Some(task) = find_next_ready(&candidates) {
        return SelectOutcome::Ready(task.clone());
    }
    if is_batch_complete(tasks) {
        return SelectOutcome::Exhausted {
            all_closed: all_closed(tasks),
        };
    }
    SelectOutcome::NothingSelectable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeTracker, blocked_task, closed_task, task};

    #[test]
    fn picks_ready_task_and_skips_manual_work() {
        let mut urgent = task("T1", 0);
        urgent.labels = vec!["manual".to_string()];
        let tasks = vec![urgent, task("T2", 3)];
        assert_eq!(
            select_next(&tasks, "manual"),
            SelectOutcome::Ready(task("T2", 3))
        );
    }

    #[test]
    fn only_manual_work_left_is_not_exhausted() {
        let mut t = task("T1", 0);
        t.labels = vec!["manual".to_string()];
        assert_eq!(
            select_next(&[t, closed_task("T2")], "manual"),
            SelectOutcome::NothingSelectable
        );
    }

    #[test]
    fn exhaustion_reports_whether_everything_is_closed() {
        assert_eq!(
            select_next(&[closed_task("T1"), closed_task("T2")], "manual"),
            SelectOutcome::Exhausted { all_closed: true }
        );
        assert_eq!(
            select_next(&[closed_task("T1"), blocked_task("T2", 0, &["X"])], "manual"),
            SelectOutcome::Exhausted { all_closed: false }
        );
        assert_eq!(
            select_next(&[], "manual"),
            SelectOutcome::Exhausted { all_closed: true }
        );
    }

    #[test]
    fn snapshot_merges_blockers_from_blocked_listing() {
        let tracker = FakeTracker::new(vec![task("T1", 0), task("T2", 1)]);
        tracker.set_blocked(vec![blocked_task("T1", 0, &["T9"])]);

        let tasks = query_snapshot(&tracker, &TrackerScope::all()).expect("snapshot");

        assert_eq!(tasks[0].blocked_by, vec!["T9".to_string()]);
        assert!(tasks[1].blocked_by.is_empty());
        assert_eq!(
            select_next(&tasks, "manual"),
            SelectOutcome::Ready(task("T2", 1))
        );
    }

    #[test]
    fn snapshot_propagates_tracker_errors() {
        let tracker = FakeTracker::new(Vec::new());
        tracker.fail_next_query("bd list exploded");
        let err = query_snapshot(&tracker, &TrackerScope::all()).unwrap_err();
        assert!(matches!(err, TrackerError::CommandFailed { .. }));
    }
}
