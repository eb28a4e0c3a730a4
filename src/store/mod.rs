// dumpkeeper/src/store/mod.rs
//! Storage backends holding dump archives.
//!
//! A `Store` exposes a tree of files addressed by store-relative paths (see
//! `utils::paths`). The engines only ever talk to this trait, so retention,
//! consolidation and sync run unchanged against the local backup directory,
//! an SFTP account or an S3 bucket.

pub mod listing;
pub mod local;
#[cfg(test)]
pub mod memory;
pub mod s3;
pub mod sftp;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::RemoteConfig;
use crate::errors::StoreError;
use crate::utils::paths;

/// A file as reported by a backend listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub path: String,
    pub size_bytes: u64,
    pub modified: Option<NaiveDateTime>,
}

/// Snapshot of a store's files and directories taken at the start of a run.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub files: Vec<StoredFile>,
    pub dirs: Vec<String>,
}

impl Listing {
    /// Builds a listing, adding every directory implied by a file path.
    pub fn new(mut files: Vec<StoredFile>, dirs: impl IntoIterator<Item = String>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);

        let mut all_dirs: BTreeSet<String> = dirs
            .into_iter()
            .map(|d| paths::normalize(&d))
            .filter(|d| !d.is_empty())
            .flat_map(|d| paths::ancestors_top_down(&d))
            .collect();
        for file in &files {
            all_dirs.extend(paths::ancestors_top_down(paths::parent(&file.path)));
        }

        Listing {
            files,
            dirs: all_dirs.into_iter().collect(),
        }
    }

    pub fn file_paths(&self) -> BTreeSet<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    /// Directories ordered deepest first, so children are settled before parents.
    pub fn dirs_bottom_up(&self) -> Vec<&str> {
        let mut dirs: Vec<&str> = self.dirs.iter().map(String::as_str).collect();
        dirs.sort_by(|a, b| paths::depth(b).cmp(&paths::depth(a)).then_with(|| b.cmp(a)));
        dirs
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Human-readable location used in logs and reports.
    fn label(&self) -> String;

    /// Enumerates the whole store. A failure here aborts the run.
    async fn list(&self) -> Result<Listing, StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Removes a directory that holds nothing. Backends without real
    /// directories treat this as a no-op.
    async fn remove_empty_dir(&self, path: &str) -> Result<(), StoreError>;

    /// Creates a single directory whose parent already exists.
    async fn make_dir(&self, path: &str) -> Result<(), StoreError>;

    /// Copies a local file to `path`, replacing any existing object.
    async fn upload(&self, source: &Path, path: &str) -> Result<u64, StoreError>;

    /// Copies the object at `path` to a local file, replacing it.
    async fn download(&self, path: &str, destination: &Path) -> Result<u64, StoreError>;
}

/// Makes sure every component of `dir` exists, creating missing ones top-down.
///
/// Succeeds whether the directory was created now or was already present,
/// including when a concurrent writer wins the race to create it.
pub async fn ensure_dir(store: &dyn Store, dir: &str) -> Result<(), StoreError> {
    for prefix in paths::ancestors_top_down(dir) {
        if store.exists(&prefix).await? {
            continue;
        }
        match store.make_dir(&prefix).await {
            Ok(()) => debug!("Created directory {} on {}", prefix, store.label()),
            Err(e) if e.is_already_exists() => {
                debug!("Directory {} already exists on {}", prefix, store.label())
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Suffix of in-flight copies; such files are never synced.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Sibling path a download is written to before it replaces the destination.
pub(crate) fn partial_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Opens the backend described by the remote configuration.
pub async fn open_remote(config: &RemoteConfig) -> Result<Box<dyn Store>> {
    match config {
        RemoteConfig::S3(spaces) => Ok(Box::new(s3::S3Store::connect(spaces).await)),
        RemoteConfig::Sftp(sftp_config) => {
            let store = sftp::SftpStore::connect(sftp_config)
                .with_context(|| format!("Failed to open SFTP session to {}", sftp_config.host))?;
            Ok(Box::new(store))
        }
        RemoteConfig::Mirror(dir) => Ok(Box::new(local::LocalStore::new(dir.clone()))),
    }
}
