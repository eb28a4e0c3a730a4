// dumpkeeper/src/retention/consolidation.rs
//! Collapses several dumps of one database taken on the same calendar day
//! into a single survivor, once they are older than the configured threshold.
//!
//! The survivor is the lexicographically last path of the bucket, which for
//! the `-HH-MM` naming scheme is the latest dump of the day. Members of the
//! minimum-kept floor are never removed, even when they are not the survivor.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{Removal, RemovalOutcome, apply_removals};
use crate::archive::{ArchiveEntry, Catalog};
use crate::config::RetentionPolicy;
use crate::errors::StoreError;
use crate::report::ConsolidationReport;
use crate::store::Store;

/// Grouping key: database series and calendar day of the capture.
pub type BucketKey = (String, NaiveDate);

#[derive(Debug, Clone)]
pub struct BucketPlan {
    pub key: BucketKey,
    pub survivor: String,
    pub remove: Vec<Removal>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationPlan {
    pub buckets: Vec<BucketPlan>,
}

impl ConsolidationPlan {
    pub fn removals(&self) -> Vec<Removal> {
        self.buckets.iter().flat_map(|b| b.remove.iter().cloned()).collect()
    }
}

/// Groups the eligible candidates by `(database, day)`.
pub fn eligible_buckets<'a>(
    catalog: &'a Catalog,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
) -> BTreeMap<BucketKey, Vec<&'a ArchiveEntry>> {
    let mut buckets: BTreeMap<BucketKey, Vec<&ArchiveEntry>> = BTreeMap::new();
    if !policy.consolidation_enabled() {
        return buckets;
    }
    let threshold = Duration::days(i64::from(policy.consolidate_after_days));
    for entry in catalog.entries.iter().filter(|e| e.is_candidate()) {
        let Some(stamp) = &entry.stamp else { continue };
        if now - stamp.captured_at < threshold {
            continue;
        }
        buckets
            .entry((stamp.database_id.clone(), stamp.captured_at.date()))
            .or_default()
            .push(entry);
    }
    buckets
}

pub fn plan_consolidation(catalog: &Catalog, policy: &RetentionPolicy, now: NaiveDateTime) -> ConsolidationPlan {
    let floor = catalog.floor(policy.min_kept);
    let mut plan = ConsolidationPlan::default();

    for (key, mut entries) in eligible_buckets(catalog, policy, now) {
        if entries.len() < 2 {
            continue;
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let Some(survivor) = entries.pop() else { continue };

        let remove: Vec<Removal> = entries
            .into_iter()
            .filter(|e| {
                let in_floor = floor.contains(e.path.as_str());
                if in_floor {
                    debug!("{} duplicates {} but is in the floor set", e.path, survivor.path);
                }
                !in_floor
            })
            .map(|e| Removal {
                path: e.path.clone(),
                sidecar: catalog.sidecar_of(&e.path).map(str::to_string),
            })
            .collect();
        if remove.is_empty() {
            continue;
        }
        plan.buckets.push(BucketPlan {
            key,
            survivor: survivor.path.clone(),
            remove,
        });
    }
    plan
}

/// Runs one consolidation pass. Disabled policies return an empty report
/// without listing the store.
pub async fn run_consolidation(
    store: &dyn Store,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
    dry_run: bool,
) -> Result<ConsolidationReport, StoreError> {
    let mut report = ConsolidationReport {
        store: store.label(),
        dry_run,
        enabled: policy.consolidation_enabled(),
        ..Default::default()
    };
    if !report.enabled {
        info!("Consolidation disabled for {}", report.store);
        return Ok(report);
    }

    let listing = store.list().await?;
    let catalog = Catalog::build(&listing, policy);
    let plan = plan_consolidation(&catalog, policy, now);
    let removals = plan.removals();
    info!(
        "Consolidation on {}: {} bucket(s) to collapse, {} archive(s) to remove",
        report.store,
        plan.buckets.len(),
        removals.len()
    );

    let outcome = if dry_run {
        RemovalOutcome::simulated(&removals)
    } else {
        apply_removals(store, &removals).await
    };

    report.buckets_collapsed = plan.buckets.len();
    report.survivors = plan.buckets.into_iter().map(|b| b.survivor).collect();
    report.removed = outcome.removed;
    report.removed_sidecars = outcome.removed_sidecars;
    report.failures = outcome.failures;
    Ok(report)
}
