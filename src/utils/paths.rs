// dumpkeeper/src/utils/paths.rs
//! Helpers for store-relative paths.
//!
//! Every backend speaks in `/`-separated paths relative to its root, with no
//! leading or trailing separator. The root itself is the empty string.

use std::path::{Component, Path};

/// Normalises a backend-native relative path into the store form.
pub fn normalize(raw: &str) -> String {
    raw.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Converts a filesystem path below `root` into the store form.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Final component of a store path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent directory of a store path; `""` for entries directly under the root.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Number of components; the root has depth 0.
pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

/// Every directory prefix of `dir`, shortest first: `a/b/c` gives `a`, `a/b`, `a/b/c`.
pub fn ancestors_top_down(dir: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

/// Joins two store paths, tolerating an empty side.
pub fn join(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base.trim_end_matches('/'), rest.trim_start_matches('/')),
    }
}
