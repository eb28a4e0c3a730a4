// dumpkeeper/src/audit/mod.rs
//! Post-hoc consistency audit of a store.
//!
//! A store is consistent when a retention pass and a consolidation pass
//! would both be no-ops, enough archives remain to satisfy the floor and the
//! sidecars agree with the checksum setting. The audit only reports.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::archive::{Catalog, tier};
use crate::checksum;
use crate::config::RetentionPolicy;
use crate::errors::StoreError;
use crate::report::Summary;
use crate::retention::consolidation::plan_consolidation;
use crate::retention::plan_retention;
use crate::store::{Listing, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Fewer candidates remain than the floor requires.
    FloorViolated { kept: usize, required: usize },
    /// A candidate outside the floor that its tier window no longer covers.
    Expired {
        path: String,
        tier: tier::Tier,
        window_days: i64,
    },
    /// A consolidation bucket still holding removable duplicates.
    DuplicateBucket {
        database_id: String,
        day: NaiveDate,
        survivor: String,
        duplicates: Vec<String>,
    },
    MissingSidecar { path: String },
    OrphanedSidecar { path: String },
    UnexpectedSidecar { path: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub store: String,
    pub candidates: usize,
    pub protected: usize,
    pub violations: Vec<Violation>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::FloorViolated { kept, required } => {
                write!(f, "only {} archive(s) kept, floor is {}", kept, required)
            }
            Violation::Expired {
                path,
                tier,
                window_days,
            } => write!(f, "{} outlived its {:?} window of {} days", path, tier, window_days),
            Violation::DuplicateBucket {
                database_id,
                day,
                survivor,
                duplicates,
            } => write!(
                f,
                "{} on {} keeps {} duplicate(s) of {}",
                database_id,
                day,
                duplicates.len(),
                survivor
            ),
            Violation::MissingSidecar { path } => write!(f, "missing sidecar for {}", path),
            Violation::OrphanedSidecar { path } => write!(f, "orphaned sidecar {}", path),
            Violation::UnexpectedSidecar { path } => write!(f, "unexpected sidecar {}", path),
        }
    }
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

impl Summary for AuditReport {
    fn summary_line(&self) -> String {
        format!(
            "{}: {} archive(s), {} protected, {} violation(s)",
            self.store,
            self.candidates,
            self.protected,
            self.violations.len()
        )
    }

    fn details(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

pub fn audit_listing(listing: &Listing, policy: &RetentionPolicy, now: NaiveDateTime) -> AuditReport {
    let catalog = Catalog::build(listing, policy);
    let candidates = catalog.ranked_candidates().len();
    let mut violations = Vec::new();

    if candidates < policy.min_kept as usize {
        violations.push(Violation::FloorViolated {
            kept: candidates,
            required: policy.min_kept as usize,
        });
    }

    for removal in plan_retention(&catalog, policy, now).remove {
        let Some(entry) = catalog.entries.iter().find(|e| e.path == removal.path) else {
            continue;
        };
        let Some(stamp) = &entry.stamp else { continue };
        violations.push(Violation::Expired {
            path: removal.path,
            tier: stamp.tier,
            window_days: tier::window_days(stamp.tier, policy),
        });
    }

    for bucket in plan_consolidation(&catalog, policy, now).buckets {
        let (database_id, day) = bucket.key;
        violations.push(Violation::DuplicateBucket {
            database_id,
            day,
            survivor: bucket.survivor,
            duplicates: bucket.remove.into_iter().map(|r| r.path).collect(),
        });
    }

    let sidecars = checksum::validate(listing, policy);
    violations.extend(
        sidecars
            .missing_sidecars
            .into_iter()
            .map(|path| Violation::MissingSidecar { path }),
    );
    violations.extend(
        sidecars
            .orphaned_sidecars
            .into_iter()
            .map(|path| Violation::OrphanedSidecar { path }),
    );
    violations.extend(
        sidecars
            .unexpected_sidecars
            .into_iter()
            .map(|path| Violation::UnexpectedSidecar { path }),
    );

    for violation in &violations {
        warn!("Consistency violation: {}", violation);
    }
    AuditReport {
        store: String::new(),
        candidates,
        protected: catalog.protected_count(),
        violations,
    }
}

pub async fn run_audit(
    store: &dyn Store,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
) -> Result<AuditReport, StoreError> {
    let listing = store.list().await?;
    let mut report = audit_listing(&listing, policy, now);
    report.store = store.label();
    info!("{}", report.summary_line());
    Ok(report)
}
