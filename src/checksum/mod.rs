// dumpkeeper/src/checksum/mod.rs
//! Read-only checks of the archive/sidecar relationship.
//!
//! With checksums enabled every compressed archive needs exactly one
//! `<archive>.sha256` next to it and every sidecar must point at an existing
//! archive, compressed or not. With checksums disabled any sidecar is a violation.
//! Nothing here creates or deletes files.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::archive::naming::{COMPRESSED_SUFFIX, SIDECAR_SUFFIX};
use crate::archive::sidecar_target;
use crate::config::RetentionPolicy;
use crate::errors::StoreError;
use crate::report::Summary;
use crate::store::local::LocalStore;
use crate::store::{Listing, Store};
use crate::utils::paths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestMismatch {
    pub archive: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChecksumReport {
    pub store: String,
    pub enabled: bool,
    pub archives_checked: usize,
    /// Forward check: archives without a sidecar.
    pub missing_sidecars: Vec<String>,
    /// Reverse check: sidecars whose archive does not exist.
    pub orphaned_sidecars: Vec<String>,
    /// Sidecars present while checksums are disabled.
    pub unexpected_sidecars: Vec<String>,
    pub digest_mismatches: Vec<DigestMismatch>,
    pub digest_errors: Vec<String>,
}

impl ChecksumReport {
    pub fn violation_count(&self) -> usize {
        self.missing_sidecars.len()
            + self.orphaned_sidecars.len()
            + self.unexpected_sidecars.len()
            + self.digest_mismatches.len()
            + self.digest_errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.violation_count() == 0
    }
}

impl Summary for ChecksumReport {
    fn summary_line(&self) -> String {
        if !self.enabled {
            return format!(
                "{}: checksums disabled, {} unexpected sidecar(s)",
                self.store,
                self.unexpected_sidecars.len()
            );
        }
        format!(
            "{}: {} archive(s) checked, {} missing sidecar(s), {} orphaned sidecar(s), {} digest mismatch(es)",
            self.store,
            self.archives_checked,
            self.missing_sidecars.len(),
            self.orphaned_sidecars.len(),
            self.digest_mismatches.len() + self.digest_errors.len()
        )
    }

    fn details(&self) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        lines.extend(self.missing_sidecars.iter().map(|p| format!("missing sidecar for {}", p)));
        lines.extend(self.orphaned_sidecars.iter().map(|p| format!("orphaned sidecar {}", p)));
        lines.extend(self.unexpected_sidecars.iter().map(|p| format!("unexpected sidecar {}", p)));
        lines.extend(self.digest_mismatches.iter().map(|m| {
            format!("digest mismatch for {}: sidecar {}, actual {}", m.archive, m.expected, m.actual)
        }));
        lines.extend(self.digest_errors.iter().cloned());
        lines
    }
}

fn is_compressed_archive(path: &str) -> bool {
    path.ends_with(COMPRESSED_SUFFIX) && !path.ends_with(SIDECAR_SUFFIX)
}

/// Checks the sidecar bijection over a listing.
pub fn validate(listing: &Listing, policy: &RetentionPolicy) -> ChecksumReport {
    let files = listing.file_paths();
    let mut report = ChecksumReport {
        enabled: policy.checksum_enabled,
        ..Default::default()
    };

    for path in &files {
        let is_sidecar = path.ends_with(SIDECAR_SUFFIX);
        if !policy.checksum_enabled {
            if is_sidecar {
                report.unexpected_sidecars.push(path.to_string());
            }
            continue;
        }

        if is_sidecar {
            let archive_ok = sidecar_target(path)
                .is_some_and(|base| !base.ends_with(SIDECAR_SUFFIX) && files.contains(base));
            if !archive_ok {
                report.orphaned_sidecars.push(path.to_string());
            }
        } else if is_compressed_archive(path) && !policy.is_protected_name(paths::file_name(path)) {
            report.archives_checked += 1;
            if !files.contains(format!("{}{}", path, SIDECAR_SUFFIX).as_str()) {
                report.missing_sidecars.push(path.to_string());
            }
        }
    }

    for missing in &report.missing_sidecars {
        warn!("Archive {} has no checksum sidecar", missing);
    }
    for orphan in &report.orphaned_sidecars {
        warn!("Sidecar {} has no matching archive", orphan);
    }
    for unexpected in &report.unexpected_sidecars {
        warn!("Sidecar {} exists but checksum validation is disabled", unexpected);
    }
    report
}

/// Lists `store` and validates it. Only the listing can fail.
pub async fn run_validation(store: &dyn Store, policy: &RetentionPolicy) -> Result<ChecksumReport, StoreError> {
    let listing = store.list().await?;
    let mut report = validate(&listing, policy);
    report.store = store.label();
    info!("{}", report.summary_line());
    Ok(report)
}

/// Hex SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Expected digest recorded in a sidecar: its first whitespace-separated token.
pub fn read_sidecar_digest(path: &Path) -> io::Result<Option<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content.split_whitespace().next().map(str::to_ascii_lowercase))
}

/// Recomputes the digest of every archive that has a sidecar and records
/// mismatches in `report`.
pub fn verify_digests(store: &LocalStore, listing: &Listing, report: &mut ChecksumReport) {
    let files = listing.file_paths();
    for path in &files {
        if path.ends_with(SIDECAR_SUFFIX) {
            continue;
        }
        let sidecar = format!("{}{}", path, SIDECAR_SUFFIX);
        if !files.contains(sidecar.as_str()) {
            continue;
        }

        let expected = match read_sidecar_digest(&store.absolute(&sidecar)) {
            Ok(Some(digest)) => digest,
            Ok(None) => {
                warn!("Sidecar {} is empty", sidecar);
                report.digest_errors.push(format!("{}: empty sidecar", sidecar));
                continue;
            }
            Err(e) => {
                warn!("Failed to read sidecar {}: {}", sidecar, e);
                report.digest_errors.push(format!("{}: {}", sidecar, e));
                continue;
            }
        };
        let actual = match sha256_file(&store.absolute(path)) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Failed to hash {}: {}", path, e);
                report.digest_errors.push(format!("{}: {}", path, e));
                continue;
            }
        };

        if expected == actual {
            debug!("Digest of {} matches", path);
        } else {
            warn!("Digest mismatch for {}: sidecar {}, actual {}", path, expected, actual);
            report.digest_mismatches.push(DigestMismatch {
                archive: path.to_string(),
                expected,
                actual,
            });
        }
    }
}
