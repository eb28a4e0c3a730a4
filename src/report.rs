// dumpkeeper/src/report.rs
//! Per-run outcome records. Engines never propagate per-item errors; they
//! collect them here and the caller decides what to print or how to exit.

use serde::Serialize;
use std::fmt;

use crate::errors::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Remove,
    RemoveDir,
    MakeDir,
    Upload,
    Download,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Remove => "remove",
            Operation::RemoveDir => "remove-dir",
            Operation::MakeDir => "make-dir",
            Operation::Upload => "upload",
            Operation::Download => "download",
        };
        f.write_str(name)
    }
}

/// Human-readable rendering of a run report; JSON output uses `Serialize`.
pub trait Summary {
    fn summary_line(&self) -> String;

    /// One line per item worth a closer look (failures, violations).
    fn details(&self) -> Vec<String> {
        Vec::new()
    }
}

pub fn failure_lines(failures: &[ItemFailure]) -> Vec<String> {
    failures
        .iter()
        .map(|f| format!("{} {}: {}", f.operation, f.path, f.cause))
        .collect()
}

/// One operation that failed without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub path: String,
    pub operation: Operation,
    pub cause: String,
}

impl ItemFailure {
    pub fn new(path: &str, operation: Operation, err: &StoreError) -> Self {
        ItemFailure {
            path: path.to_string(),
            operation,
            cause: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub store: String,
    pub dry_run: bool,
    pub protected: usize,
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    pub removed_sidecars: Vec<String>,
    pub removed_dirs: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl Summary for RetentionReport {
    fn summary_line(&self) -> String {
        format!(
            "{}{}: kept {} (+{} protected), removed {} archive(s), {} sidecar(s), {} dir(s), {} failure(s)",
            self.store,
            if self.dry_run { " [dry-run]" } else { "" },
            self.kept.len(),
            self.protected,
            self.removed.len(),
            self.removed_sidecars.len(),
            self.removed_dirs.len(),
            self.failures.len()
        )
    }

    fn details(&self) -> Vec<String> {
        failure_lines(&self.failures)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub store: String,
    pub dry_run: bool,
    /// False when the threshold is 0 and nothing was examined.
    pub enabled: bool,
    pub buckets_collapsed: usize,
    pub survivors: Vec<String>,
    pub removed: Vec<String>,
    pub removed_sidecars: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl Summary for ConsolidationReport {
    fn summary_line(&self) -> String {
        if !self.enabled {
            return format!("{}: consolidation disabled", self.store);
        }
        format!(
            "{}{}: collapsed {} bucket(s), removed {} archive(s), {} sidecar(s), {} failure(s)",
            self.store,
            if self.dry_run { " [dry-run]" } else { "" },
            self.buckets_collapsed,
            self.removed.len(),
            self.removed_sidecars.len(),
            self.failures.len()
        )
    }

    fn details(&self) -> Vec<String> {
        failure_lines(&self.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_failure_keeps_cause() {
        let failure = ItemFailure::new(
            "2025/a.dmp",
            Operation::Remove,
            &StoreError::Transport("connection reset".to_string()),
        );
        assert_eq!(failure.operation.to_string(), "remove");
        assert!(failure.cause.contains("connection reset"));
    }

    #[test]
    fn test_summary_lines() {
        let report = RetentionReport {
            store: "/backups".to_string(),
            dry_run: true,
            protected: 1,
            kept: vec!["a".to_string(), "b".to_string()],
            removed: vec!["c".to_string()],
            ..Default::default()
        };
        assert_eq!(
            report.summary_line(),
            "/backups [dry-run]: kept 2 (+1 protected), removed 1 archive(s), 0 sidecar(s), 0 dir(s), 0 failure(s)"
        );
        let disabled = ConsolidationReport {
            store: "memory".to_string(),
            ..Default::default()
        };
        assert_eq!(disabled.summary_line(), "memory: consolidation disabled");
    }
}
