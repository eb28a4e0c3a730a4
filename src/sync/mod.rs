// dumpkeeper/src/sync/mod.rs
pub(crate) mod logic;

use serde::Serialize;

use crate::errors::StoreError;
use crate::report::{ItemFailure, Summary, failure_lines};
use crate::store::Store;
use crate::store::local::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
}

/// Outcome of one best-effort sync batch.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub direction: SyncDirection,
    pub source: String,
    pub destination: String,
    pub transferred: Vec<String>,
    pub bytes: u64,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    fn new(direction: SyncDirection, source: String, destination: String) -> Self {
        SyncReport {
            direction,
            source,
            destination,
            transferred: Vec::new(),
            bytes: 0,
            failures: Vec::new(),
        }
    }

    fn record_transfer(&mut self, path: &str, bytes: u64) {
        self.transferred.push(path.to_string());
        self.bytes += bytes;
    }
}

impl Summary for SyncReport {
    fn summary_line(&self) -> String {
        let arrow = match self.direction {
            SyncDirection::Push => "↑",
            SyncDirection::Pull => "↓",
        };
        format!(
            "{} -> {}: {}{} file(s), {} bytes, {} failure(s)",
            self.source,
            self.destination,
            arrow,
            self.transferred.len(),
            self.bytes,
            self.failures.len()
        )
    }

    fn details(&self) -> Vec<String> {
        failure_lines(&self.failures)
    }
}

/// Public entry point for the sync process.
///
/// Per-file failures end up in the report; only a failed listing of the
/// source side is returned as an error.
pub async fn run_sync_flow(
    direction: SyncDirection,
    local: &LocalStore,
    remote: &dyn Store,
) -> Result<SyncReport, StoreError> {
    match direction {
        SyncDirection::Push => logic::perform_push(local, remote).await,
        SyncDirection::Pull => logic::perform_pull(remote, local).await,
    }
}
