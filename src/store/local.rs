// dumpkeeper/src/store/local.rs
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Listing, Store, StoredFile, partial_path};
use crate::errors::StoreError;
use crate::utils::paths;

/// Backup directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute filesystem path of a store path.
    pub fn absolute(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|p| !p.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

/// Copies `source` over `destination` through a `.part` sibling so an
/// interrupted copy never leaves a truncated destination behind.
pub(crate) fn replace_file(source: &Path, destination: &Path, path: &str) -> Result<u64, StoreError> {
    let partial = partial_path(destination);
    let bytes = fs::copy(source, &partial).map_err(|e| StoreError::from_io(path, e))?;
    if let Err(e) = fs::rename(&partial, destination) {
        let _ = fs::remove_file(&partial);
        return Err(StoreError::from_io(path, e));
    }
    Ok(bytes)
}

#[async_trait]
impl Store for LocalStore {
    fn label(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn list(&self) -> Result<Listing, StoreError> {
        if !self.root.is_dir() {
            return Err(StoreError::Listing(format!(
                "backup root is not a directory: {}",
                self.root.display()
            )));
        }

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| {
                StoreError::Listing(format!("failed to walk {}: {}", self.root.display(), e))
            })?;
            let Some(rel) = paths::relative_to(&self.root, entry.path()) else {
                continue;
            };
            if entry.file_type().is_dir() {
                dirs.push(rel);
                continue;
            }
            let metadata = entry.metadata().map_err(|e| {
                StoreError::Listing(format!("failed to stat {}: {}", entry.path().display(), e))
            })?;
            let modified = metadata
                .modified()
                .ok()
                .map(|t| DateTime::<Local>::from(t).naive_local());
            files.push(StoredFile {
                path: rel,
                size_bytes: metadata.len(),
                modified,
            });
        }
        Ok(Listing::new(files, dirs))
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.absolute(path)
            .try_exists()
            .map_err(|e| StoreError::from_io(path, e))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        fs::remove_file(self.absolute(path)).map_err(|e| StoreError::from_io(path, e))
    }

    async fn remove_empty_dir(&self, path: &str) -> Result<(), StoreError> {
        // remove_dir fails on a directory that still has entries.
        fs::remove_dir(self.absolute(path)).map_err(|e| StoreError::from_io(path, e))
    }

    async fn make_dir(&self, path: &str) -> Result<(), StoreError> {
        fs::create_dir(self.absolute(path)).map_err(|e| StoreError::from_io(path, e))
    }

    async fn upload(&self, source: &Path, path: &str) -> Result<u64, StoreError> {
        replace_file(source, &self.absolute(path), path)
    }

    async fn download(&self, path: &str, destination: &Path) -> Result<u64, StoreError> {
        replace_file(&self.absolute(path), destination, path)
    }
}
