// dumpkeeper/src/archive/mod.rs
//! Turns a raw store listing into archive entries the engines can reason
//! about.
//!
//! Every file ends up in exactly one of three places: a candidate (a dump
//! whose name parses and which no policy protects), a protected entry, or a
//! checksum sidecar attached to its archive. Sidecars whose archive is gone
//! are kept apart as orphans.

pub mod naming;
pub mod tier;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::RetentionPolicy;
use crate::store::{Listing, StoredFile};
use crate::utils::paths;
use naming::{SIDECAR_SUFFIX, parse_archive_name};
use tier::Tier;

/// What the name of a dump tells us about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stamp {
    pub database_id: String,
    pub tier: Tier,
    pub captured_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub size_bytes: u64,
    pub protected: bool,
    /// `None` when the name does not follow the dump convention.
    pub stamp: Option<Stamp>,
}

impl ArchiveEntry {
    fn from_file(file: &StoredFile, policy: &RetentionPolicy) -> Self {
        let name = paths::file_name(&file.path);
        let stamp = match parse_archive_name(name) {
            Ok(parsed) => {
                let foreign = policy
                    .dump_prefix
                    .as_deref()
                    .is_some_and(|prefix| parsed.database_under(prefix).is_none());
                if foreign {
                    debug!("{} belongs to another dump prefix, protecting it", file.path);
                }
                Some((
                    Stamp {
                        database_id: parsed.database_id(),
                        tier: tier::classify(parsed.captured_at),
                        captured_at: parsed.captured_at,
                    },
                    foreign,
                ))
            }
            Err(e) => {
                debug!("{} is not a dump archive ({}), protecting it", file.path, e);
                None
            }
        };

        let protected = match &stamp {
            None => true,
            Some((_, foreign)) => *foreign || policy.is_protected_name(name),
        };
        ArchiveEntry {
            path: file.path.clone(),
            size_bytes: file.size_bytes,
            protected,
            stamp: stamp.map(|(s, _)| s),
        }
    }

    pub fn is_candidate(&self) -> bool {
        !self.protected && self.stamp.is_some()
    }

    pub fn captured_at(&self) -> Option<NaiveDateTime> {
        self.stamp.as_ref().map(|s| s.captured_at)
    }
}

/// The archives of one store as seen at the start of a run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub entries: Vec<ArchiveEntry>,
    /// Archive path -> sidecar path.
    pub sidecars: BTreeMap<String, String>,
    pub orphan_sidecars: Vec<String>,
}

/// Archive path a sidecar refers to.
pub fn sidecar_target(path: &str) -> Option<&str> {
    path.strip_suffix(SIDECAR_SUFFIX).filter(|base| !paths::file_name(base).is_empty())
}

impl Catalog {
    pub fn build(listing: &Listing, policy: &RetentionPolicy) -> Self {
        let all_paths = listing.file_paths();
        let mut catalog = Catalog::default();

        for file in &listing.files {
            if let Some(base) = sidecar_target(&file.path) {
                if all_paths.contains(base) && sidecar_target(base).is_none() {
                    catalog.sidecars.insert(base.to_string(), file.path.clone());
                } else {
                    catalog.orphan_sidecars.push(file.path.clone());
                }
                continue;
            }
            catalog.entries.push(ArchiveEntry::from_file(file, policy));
        }
        catalog
    }

    pub fn protected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.protected).count()
    }

    /// Candidates newest first; equal timestamps fall back to path, descending.
    pub fn ranked_candidates(&self) -> Vec<&ArchiveEntry> {
        let mut ranked: Vec<&ArchiveEntry> =
            self.entries.iter().filter(|e| e.is_candidate()).collect();
        ranked.sort_by(|a, b| {
            b.captured_at()
                .cmp(&a.captured_at())
                .then_with(|| b.path.cmp(&a.path))
        });
        ranked
    }

    /// Paths of the newest `min_kept` candidates, exempt from every removal.
    pub fn floor(&self, min_kept: u32) -> BTreeSet<&str> {
        self.ranked_candidates()
            .into_iter()
            .take(min_kept as usize)
            .map(|e| e.path.as_str())
            .collect()
    }

    pub fn sidecar_of(&self, archive_path: &str) -> Option<&str> {
        self.sidecars.get(archive_path).map(String::as_str)
    }
}
