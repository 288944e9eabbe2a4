use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Summary of one orphan cleanup sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub scanned: usize,
    /// Orphans removed, or that would have been removed in dry-run mode
    pub deleted: usize,
    /// Records kept because they are too young or still referenced
    pub skipped: usize,
    pub failed: usize,
    pub bytes_freed: u64,
    pub dry_run: bool,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl CleanupResult {
    /// Whether the sweep deleted anything or hit an error.
    pub fn has_activity(&self) -> bool {
        self.deleted > 0 || !self.errors.is_empty()
    }

    /// Count a per-file failure and keep its message.
    pub fn record_error(&mut self, error: String) {
        self.failed += 1;
        self.errors.push(error);
    }
}

/// Summary of one backend migration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub scanned: usize,
    pub migrated: usize,
    /// Files already present at the destination
    pub skipped: usize,
    pub failed: usize,
    pub bytes_migrated: u64,
    /// True when the run was skipped because the completion marker exists
    pub already_complete: bool,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl MigrationResult {
    /// Count a per-file failure and keep its message.
    pub fn record_error(&mut self, error: String) {
        self.failed += 1;
        self.errors.push(error);
    }
}
