// dumpkeeper/src/sync/logic.rs
use std::collections::HashSet;
use std::fs;
use tracing::{debug, info, warn};

use super::{SyncDirection, SyncReport};
use crate::errors::StoreError;
use crate::report::{ItemFailure, Operation};
use crate::store::local::LocalStore;
use crate::store::{PARTIAL_SUFFIX, Store, ensure_dir};
use crate::utils::paths;

fn is_in_flight(path: &str) -> bool {
    path.ends_with(PARTIAL_SUFFIX)
}

/// Copies every local file to the same relative path on `remote`.
///
/// Parent directories are ensured top-down before each transfer; a directory
/// is only ensured once per run. Existing remote objects are overwritten.
pub async fn perform_push(local: &LocalStore, remote: &dyn Store) -> Result<SyncReport, StoreError> {
    let listing = local.list().await?;
    let mut report = SyncReport::new(SyncDirection::Push, local.label(), remote.label());
    let mut ensured: HashSet<String> = HashSet::new();
    info!(
        "⬆️ Pushing {} file(s) from {} to {}",
        listing.files.len(),
        report.source,
        report.destination
    );

    for file in &listing.files {
        if is_in_flight(&file.path) {
            debug!("Skipping in-flight copy {}", file.path);
            continue;
        }

        let parent = paths::parent(&file.path);
        if !parent.is_empty() && !ensured.contains(parent) {
            if let Err(e) = ensure_dir(remote, parent).await {
                warn!("Failed to create {} on {}: {}", parent, remote.label(), e);
                report.failures.push(ItemFailure::new(parent, Operation::MakeDir, &e));
                continue;
            }
            ensured.insert(parent.to_string());
        }

        match remote.upload(&local.absolute(&file.path), &file.path).await {
            Ok(bytes) => {
                debug!("Uploaded {} ({} bytes)", file.path, bytes);
                report.record_transfer(&file.path, bytes);
            }
            Err(e) => {
                warn!("Failed to upload {} to {}: {}", file.path, remote.label(), e);
                report.failures.push(ItemFailure::new(&file.path, Operation::Upload, &e));
            }
        }
    }
    Ok(report)
}

/// Recreates the remote tree under the local root and fetches every file,
/// replacing local copies.
pub async fn perform_pull(remote: &dyn Store, local: &LocalStore) -> Result<SyncReport, StoreError> {
    let listing = remote.list().await?;
    let mut report = SyncReport::new(SyncDirection::Pull, remote.label(), local.label());
    info!(
        "⬇️ Pulling {} file(s) from {} to {}",
        listing.files.len(),
        report.source,
        report.destination
    );

    fs::create_dir_all(local.root()).map_err(|e| StoreError::from_io("", e))?;
    // `Listing::dirs` is sorted, so parents come before their children.
    for dir in &listing.dirs {
        if let Err(e) = fs::create_dir_all(local.absolute(dir)) {
            let e = StoreError::from_io(dir, e);
            warn!("Failed to create local directory {}: {}", dir, e);
            report.failures.push(ItemFailure::new(dir, Operation::MakeDir, &e));
        }
    }

    for file in &listing.files {
        if is_in_flight(&file.path) {
            debug!("Skipping in-flight copy {}", file.path);
            continue;
        }
        let destination = local.absolute(&file.path);
        match remote.download(&file.path, &destination).await {
            Ok(bytes) => {
                debug!("Downloaded {} ({} bytes)", file.path, bytes);
                report.record_transfer(&file.path, bytes);
            }
            Err(e) => {
                warn!("Failed to download {} from {}: {}", file.path, remote.label(), e);
                report.failures.push(ItemFailure::new(&file.path, Operation::Download, &e));
            }
        }
    }
    Ok(report)
}
