//! Which backlog a run works against.

use std::path::PathBuf;

/// The two supported ways of feeding work to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workflow {
    /// Select tasks from the issue tracker, one per iteration.
    TrackerBacked(TrackerScope),
    /// Point the agent at a single backlog document and let it pick its own
    /// work. Kept for older projects; completion relies on the sentinel.
    LegacyDocument(LegacyDocument),
}

/// Restricts selection to the children of one parent task (usually an epic).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerScope {
    pub parent: Option<String>,
}

impl TrackerScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn under(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyDocument {
    pub path: PathBuf,
}
