// dumpkeeper/src/retention/mod.rs
//! Tiered expiry with a minimum-kept floor, followed by pruning of the
//! directories the deletions leave empty.

pub mod consolidation;

use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::archive::{Catalog, tier};
use crate::config::RetentionPolicy;
use crate::errors::StoreError;
use crate::report::{ItemFailure, Operation, RetentionReport};
use crate::store::{Listing, Store};

/// An archive scheduled for deletion, together with its sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub path: String,
    pub sidecar: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RetentionPlan {
    pub keep: Vec<String>,
    pub remove: Vec<Removal>,
}

/// Decides, without touching any store, which candidates expire.
pub fn plan_retention(catalog: &Catalog, policy: &RetentionPolicy, now: NaiveDateTime) -> RetentionPlan {
    let mut plan = RetentionPlan::default();
    for (rank, entry) in catalog.ranked_candidates().into_iter().enumerate() {
        let Some(captured_at) = entry.captured_at() else {
            continue;
        };
        if rank < policy.min_kept as usize {
            debug!("{} is in the floor set", entry.path);
            plan.keep.push(entry.path.clone());
        } else if tier::is_expired(captured_at, policy, now) {
            plan.remove.push(Removal {
                path: entry.path.clone(),
                sidecar: catalog.sidecar_of(&entry.path).map(str::to_string),
            });
        } else {
            plan.keep.push(entry.path.clone());
        }
    }
    plan
}

/// What actually disappeared from the store while applying removals.
#[derive(Debug, Default)]
pub(crate) struct RemovalOutcome {
    pub removed: Vec<String>,
    pub removed_sidecars: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl RemovalOutcome {
    /// Counts the removals as done without touching the store.
    pub fn simulated(removals: &[Removal]) -> Self {
        RemovalOutcome {
            removed: removals.iter().map(|r| r.path.clone()).collect(),
            removed_sidecars: removals.iter().filter_map(|r| r.sidecar.clone()).collect(),
            failures: Vec::new(),
        }
    }
}

async fn remove_file(store: &dyn Store, path: &str) -> Result<(), StoreError> {
    match store.remove(path).await {
        Ok(()) => {
            info!("Removed {} from {}", path, store.label());
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!("{} was already gone from {}", path, store.label());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Deletes each archive and then its sidecar. A sidecar is only removed once
/// its archive is gone, so a failed delete never leaves an archive unsigned.
pub(crate) async fn apply_removals(store: &dyn Store, removals: &[Removal]) -> RemovalOutcome {
    let mut outcome = RemovalOutcome::default();
    for removal in removals {
        if let Err(e) = remove_file(store, &removal.path).await {
            warn!("Failed to remove {} from {}: {}", removal.path, store.label(), e);
            outcome
                .failures
                .push(ItemFailure::new(&removal.path, Operation::Remove, &e));
            continue;
        }
        outcome.removed.push(removal.path.clone());

        if let Some(sidecar) = &removal.sidecar {
            match remove_file(store, sidecar).await {
                Ok(()) => outcome.removed_sidecars.push(sidecar.clone()),
                Err(e) => {
                    warn!("Failed to remove sidecar {} from {}: {}", sidecar, store.label(), e);
                    outcome.failures.push(ItemFailure::new(sidecar, Operation::Remove, &e));
                }
            }
        }
    }
    outcome
}

fn has_entry_below(set: &BTreeSet<String>, dir: &str) -> bool {
    let prefix = format!("{}/", dir);
    set.range(prefix.clone()..)
        .next()
        .is_some_and(|p| p.starts_with(&prefix))
}

/// Walks directories deepest first and removes those with nothing left
/// beneath them. The store root itself is never removed.
async fn prune_empty_dirs(
    store: &dyn Store,
    listing: &Listing,
    gone: &BTreeSet<&str>,
    dry_run: bool,
    failures: &mut Vec<ItemFailure>,
) -> Vec<String> {
    let remaining_files: BTreeSet<String> = listing
        .files
        .iter()
        .filter(|f| !gone.contains(f.path.as_str()))
        .map(|f| f.path.clone())
        .collect();
    let mut remaining_dirs: BTreeSet<String> = listing.dirs.iter().cloned().collect();
    let mut removed = Vec::new();

    for dir in listing.dirs_bottom_up() {
        if has_entry_below(&remaining_files, dir) || has_entry_below(&remaining_dirs, dir) {
            continue;
        }
        if !dry_run {
            match store.remove_empty_dir(dir).await {
                Ok(()) => info!("Removed empty directory {} from {}", dir, store.label()),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!("Failed to remove directory {} from {}: {}", dir, store.label(), e);
                    failures.push(ItemFailure::new(dir, Operation::RemoveDir, &e));
                    continue;
                }
            }
        }
        remaining_dirs.remove(dir);
        removed.push(dir.to_string());
    }
    removed
}

/// Runs one retention pass against `store`.
///
/// Only a failed listing is returned as an error. Every other failure is
/// recorded in the report and the pass carries on.
pub async fn run_retention(
    store: &dyn Store,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
    dry_run: bool,
) -> Result<RetentionReport, StoreError> {
    let listing = store.list().await?;
    let catalog = Catalog::build(&listing, policy);
    let plan = plan_retention(&catalog, policy, now);
    info!(
        "Retention on {}: {} candidate(s), {} to remove",
        store.label(),
        plan.keep.len() + plan.remove.len(),
        plan.remove.len()
    );

    let mut outcome = if dry_run {
        RemovalOutcome::simulated(&plan.remove)
    } else {
        apply_removals(store, &plan.remove).await
    };
    let gone: BTreeSet<&str> = outcome
        .removed
        .iter()
        .chain(outcome.removed_sidecars.iter())
        .map(String::as_str)
        .collect();
    let removed_dirs = prune_empty_dirs(store, &listing, &gone, dry_run, &mut outcome.failures).await;

    Ok(RetentionReport {
        store: store.label(),
        dry_run,
        protected: catalog.protected_count(),
        kept: plan.keep,
        removed: outcome.removed,
        removed_sidecars: outcome.removed_sidecars,
        removed_dirs,
        failures: outcome.failures,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::memory::{Fault, MemoryStore, Op};
    use chrono::{Duration, NaiveDate};

    pub(crate) fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 22)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    /// `<dir>/PG_<db>.<DD>-<Month>-<YYYY>-<HH>-<MM>.dmp.gz` for a dump taken `age` ago.
    pub(crate) fn dump(dir: &str, db: &str, age: Duration) -> String {
        let at = now() - age;
        format!("{}/{}", dir, at.format(&format!("PG_{}.%d-%B-%Y-%H-%M.dmp.gz", db)))
    }

    fn daily_store(days: std::ops::RangeInclusive<i64>) -> (MemoryStore, Vec<String>) {
        let store = MemoryStore::new().with_file("globals.sql", b"roles");
        let names: Vec<String> = days
            .map(|d| dump("2025/December", "gis", Duration::days(d)))
            .collect();
        for name in &names {
            store.put(name, b"dump");
        }
        (store, names)
    }

    #[tokio::test]
    async fn test_daily_expiry_with_floor_and_protected_file() -> anyhow::Result<()> {
        let (store, names) = daily_store(1..=10);
        let report = run_retention(&store, &RetentionPolicy::default(), now(), false).await?;

        // 8, 9 and 10 days old exceed the 7-day window.
        let mut expected_removed = names[7..].to_vec();
        expected_removed.sort();
        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(removed, expected_removed);
        assert!(report.failures.is_empty());
        assert_eq!(report.protected, 1);

        let remaining = store.file_paths();
        assert!(remaining.contains(&"globals.sql".to_string()));
        for name in &names[..7] {
            assert!(remaining.contains(name));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_floor_keeps_newest_when_everything_is_stale() -> anyhow::Result<()> {
        let (store, names) = daily_store(20..=24);
        let report = run_retention(&store, &RetentionPolicy::default(), now(), false).await?;

        assert_eq!(report.removed.len(), 3);
        assert_eq!(report.kept, vec![names[0].clone(), names[1].clone()]);
        assert_eq!(store.file_paths().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_sidecar_is_removed_with_its_archive() -> anyhow::Result<()> {
        let (store, names) = daily_store(1..=3);
        let stale = dump("2025/December", "gis", Duration::days(30));
        let sidecar = format!("{}.sha256", stale);
        store.put(&stale, b"old");
        store.put(&sidecar, b"abc  file");
        store.put(&format!("{}.sha256", names[0]), b"def  file");

        let report = run_retention(&store, &RetentionPolicy::default(), now(), false).await?;

        assert_eq!(report.removed, vec![stale.clone()]);
        assert_eq!(report.removed_sidecars, vec![sidecar.clone()]);
        let remaining = store.file_paths();
        assert!(!remaining.contains(&sidecar));
        assert!(remaining.contains(&format!("{}.sha256", names[0])));
        // Sidecars never count as kept archives.
        assert_eq!(report.kept.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_delete_is_reported_and_run_continues() -> anyhow::Result<()> {
        let (store, names) = daily_store(1..=10);
        store.inject(Op::Remove, &names[8], Fault::Denied);

        let report = run_retention(&store, &RetentionPolicy::default(), now(), false).await?;

        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, names[8]);
        assert_eq!(report.failures[0].operation, Operation::Remove);
        assert!(store.file_paths().contains(&names[8]));
        assert!(!store.file_paths().contains(&names[9]));
        Ok(())
    }

    #[tokio::test]
    async fn test_already_deleted_file_counts_as_removed() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let removals = vec![Removal {
            path: "gone.dmp".to_string(),
            sidecar: None,
        }];
        let outcome = apply_removals(&store, &removals).await;
        assert_eq!(outcome.removed, vec!["gone.dmp"]);
        assert!(outcome.failures.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let store = MemoryStore::new().with_file("globals.sql", b"");
        store.fail_listing();
        let result = run_retention(&store, &RetentionPolicy::default(), now(), false).await;
        assert!(matches!(result, Err(StoreError::Listing(_))));
    }

    #[tokio::test]
    async fn test_emptied_directories_are_pruned_bottom_up() -> anyhow::Result<()> {
        let (store, _) = daily_store(1..=2);
        let stale = dump("2025/November", "gis", Duration::days(40));
        store.put(&stale, b"old");
        store.put("2025/October/globals.sql", b"roles");
        store.add_dir("leftover/empty");

        let report = run_retention(&store, &RetentionPolicy::default(), now(), false).await?;

        assert_eq!(report.removed, vec![stale]);
        assert_eq!(
            report.removed_dirs,
            vec!["leftover/empty", "2025/November", "leftover"]
        );
        let dirs = store.dir_paths();
        assert!(dirs.contains(&"2025/October".to_string()));
        assert!(dirs.contains(&"2025".to_string()));
        assert!(!dirs.contains(&"leftover".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() -> anyhow::Result<()> {
        let (store, _) = daily_store(1..=10);
        let before = store.file_paths();
        let report = run_retention(&store, &RetentionPolicy::default(), now(), true).await?;
        assert_eq!(report.removed.len(), 3);
        assert!(report.dry_run);
        assert_eq!(store.file_paths(), before);
        assert!(store.calls(Op::Remove).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() -> anyhow::Result<()> {
        let (store, _) = daily_store(1..=10);
        store.put(&dump("2024/June", "gis", Duration::days(200)), b"old");
        let policy = RetentionPolicy::default();

        run_retention(&store, &policy, now(), false).await?;
        let files = store.file_paths();
        let dirs = store.dir_paths();

        let second = run_retention(&store, &policy, now(), false).await?;
        assert!(second.removed.is_empty());
        assert!(second.removed_dirs.is_empty());
        assert_eq!(store.file_paths(), files);
        assert_eq!(store.dir_paths(), dirs);
        Ok(())
    }

    #[tokio::test]
    async fn test_object_store_folder_markers_are_pruned_once() -> anyhow::Result<()> {
        let store = MemoryStore::object_store().with_file("globals.sql", b"roles");
        for day in 1..=2 {
            store.put(&dump("2025/December", "gis", Duration::days(day)), b"dump");
        }
        let stale = dump("2025/November", "gis", Duration::days(40));
        store.put(&stale, b"old");
        store.add_dir("2025/November");
        store.add_dir("archive/empty");
        let policy = RetentionPolicy::default();

        let first = run_retention(&store, &policy, now(), false).await?;
        assert_eq!(first.removed, vec![stale]);
        assert_eq!(
            first.removed_dirs,
            vec!["archive/empty", "2025/November", "archive"]
        );
        assert_eq!(store.dir_paths(), vec!["2025".to_string()]);

        let second = run_retention(&store, &policy, now(), false).await?;
        assert!(second.removed_dirs.is_empty(), "dirs: {:?}", second.removed_dirs);
        Ok(())
    }

    #[test]
    fn test_monthly_and_yearly_windows_apply_in_plan() {
        let files = [
            "PG_gis.01-March-2025.dmp",     // monthly, 296 days old
            "PG_gis.01-December-2024.dmp",  // monthly, 386 days old
            "PG_gis.01-January-2023.dmp",   // yearly, 1086 days old
            "PG_gis.01-January-2022.dmp",   // yearly, 1451 days old
            "PG_gis.21-December-2025.dmp",
            "PG_gis.20-December-2025.dmp",
        ];
        let listing = Listing::new(
            files
                .iter()
                .map(|p| crate::store::StoredFile {
                    path: p.to_string(),
                    size_bytes: 1,
                    modified: None,
                })
                .collect(),
            Vec::<String>::new(),
        );
        let policy = RetentionPolicy::default();
        let plan = plan_retention(&Catalog::build(&listing, &policy), &policy, now());
        let removed: Vec<&str> = plan.remove.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            removed,
            vec!["PG_gis.01-December-2024.dmp", "PG_gis.01-January-2022.dmp"]
        );
        assert_eq!(plan.keep.len(), 4);
    }
}
