// dumpkeeper/src/store/memory.rs
//! In-memory `Store` used by engine tests, with per-path failure injection.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use super::{Listing, Store, StoredFile};
use crate::errors::StoreError;
use crate::utils::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Exists,
    Remove,
    RemoveDir,
    MakeDir,
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    AlreadyExists,
    Transport,
    Denied,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, (Vec<u8>, Option<NaiveDateTime>)>,
    dirs: BTreeSet<String>,
    faults: HashMap<(Op, String), Fault>,
    fail_listing: bool,
    calls: Vec<(Op, String)>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    /// Behaves like object storage: directories are implicit.
    implicit_dirs: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_store() -> Self {
        MemoryStore {
            state: Mutex::default(),
            implicit_dirs: true,
        }
    }

    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        self.put(path, content);
        self
    }

    pub fn put(&self, path: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if !self.implicit_dirs {
            state.dirs.extend(paths::ancestors_top_down(paths::parent(path)));
        }
        state.files.insert(path.to_string(), (content.to_vec(), None));
    }

    pub fn add_dir(&self, dir: &str) {
        self.state.lock().unwrap().dirs.extend(paths::ancestors_top_down(dir));
    }

    pub fn inject(&self, op: Op, path: &str, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert((op, path.to_string()), fault);
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn dir_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().dirs.iter().cloned().collect()
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).map(|(c, _)| c.clone())
    }

    pub fn calls(&self, op: Op) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn check(&self, op: Op, path: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((op, path.to_string()));
        match state.faults.get(&(op, path.to_string())) {
            None => Ok(()),
            Some(Fault::AlreadyExists) => Err(StoreError::AlreadyExists(path.to_string())),
            Some(Fault::Transport) => Err(StoreError::Transport(format!("injected failure on {}", path))),
            Some(Fault::Denied) => Err(StoreError::Io {
                path: path.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn label(&self) -> String {
        "memory".to_string()
    }

    async fn list(&self) -> Result<Listing, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(StoreError::Listing("injected listing failure".to_string()));
        }
        let files = state
            .files
            .iter()
            .map(|(path, (content, modified))| StoredFile {
                path: path.clone(),
                size_bytes: content.len() as u64,
                modified: *modified,
            })
            .collect();
        Ok(Listing::new(files, state.dirs.iter().cloned().collect::<Vec<_>>()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.check(Op::Exists, path)?;
        let state = self.state.lock().unwrap();
        Ok(state.files.contains_key(path) || state.dirs.contains(path))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.check(Op::Remove, path)?;
        match self.state.lock().unwrap().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }

    async fn remove_empty_dir(&self, path: &str) -> Result<(), StoreError> {
        self.check(Op::RemoveDir, path)?;
        let mut state = self.state.lock().unwrap();
        let prefix = format!("{}/", path);
        let occupied = state.files.keys().any(|f| f.starts_with(&prefix))
            || state.dirs.iter().any(|d| d.starts_with(&prefix));
        if occupied {
            return Err(StoreError::Io {
                path: path.to_string(),
                source: std::io::Error::other("directory not empty"),
            });
        }
        state.dirs.remove(path);
        Ok(())
    }

    async fn make_dir(&self, path: &str) -> Result<(), StoreError> {
        // An injected AlreadyExists models a directory created by someone else.
        let checked = self.check(Op::MakeDir, path);
        if let Err(e) = &checked {
            if !e.is_already_exists() {
                return checked;
            }
        }
        if !self.implicit_dirs {
            let mut state = self.state.lock().unwrap();
            if !state.dirs.insert(path.to_string()) {
                return Err(StoreError::AlreadyExists(path.to_string()));
            }
        }
        checked
    }

    async fn upload(&self, source: &Path, path: &str) -> Result<u64, StoreError> {
        self.check(Op::Upload, path)?;
        let content = fs::read(source).map_err(|e| StoreError::from_io(path, e))?;
        let mut state = self.state.lock().unwrap();
        if !self.implicit_dirs && !paths::parent(path).is_empty() && !state.dirs.contains(paths::parent(path)) {
            return Err(StoreError::NotFound(paths::parent(path).to_string()));
        }
        let len = content.len() as u64;
        state.files.insert(path.to_string(), (content, None));
        Ok(len)
    }

    async fn download(&self, path: &str, destination: &Path) -> Result<u64, StoreError> {
        self.check(Op::Download, path)?;
        let content = self
            .content(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        fs::write(destination, &content).map_err(|e| StoreError::from_io(path, e))?;
        Ok(content.len() as u64)
    }
}
