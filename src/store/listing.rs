// dumpkeeper/src/store/listing.rs
//! Parser for text inventories of an object store.
//!
//! The accepted format is the one printed by `s3cmd ls --recursive`:
//!
//! ```text
//! 2025-12-22 06:10      48213  s3://bucket/2025/December/PG_gis_gis.22-December-2025-06-09.dmp.gz
//! ```
//!
//! Lines that do not match are skipped and counted rather than failing the
//! whole listing.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use super::{Listing, StoredFile};
use crate::utils::paths;

static OBJECT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<date>\d{4}-\d{2}-\d{2})\s+(?P<time>\d{2}:\d{2})\s+(?P<size>\d+)\s+(?P<path>\S.*?)\s*$")
        .expect("object listing pattern is a valid regex")
});

#[derive(Debug, Default)]
pub struct ObjectListing {
    pub listing: Listing,
    /// 1-based line numbers of lines that could not be parsed.
    pub skipped_lines: Vec<usize>,
}

/// Parses one inventory line into `(modified, size, raw path)`.
pub fn parse_object_line(line: &str) -> Option<(NaiveDateTime, u64, &str)> {
    let caps = OBJECT_LINE.captures(line.trim())?;
    let modified = NaiveDateTime::parse_from_str(
        &format!("{} {}", &caps["date"], &caps["time"]),
        "%Y-%m-%d %H:%M",
    )
    .ok()?;
    let size = caps["size"].parse().ok()?;
    Some((modified, size, caps.name("path")?.as_str()))
}

/// Strips the `s3://bucket/` scheme and the optional folder prefix.
fn store_path(raw: &str, prefix: Option<&str>) -> Option<String> {
    let without_scheme = match raw.strip_prefix("s3://") {
        Some(rest) => rest.split_once('/').map(|(_, key)| key).unwrap_or(""),
        None => raw,
    };
    let key = paths::normalize(without_scheme);
    match prefix.map(paths::normalize).filter(|p| !p.is_empty()) {
        Some(p) if key == p => Some(String::new()),
        Some(p) => key.strip_prefix(&format!("{}/", p)).map(str::to_string),
        None => Some(key),
    }
}

pub fn parse_object_listing(text: &str, prefix: Option<&str>) -> ObjectListing {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut skipped_lines = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((modified, size, raw_path)) = parse_object_line(line) else {
            warn!("Skipping malformed listing line {}: {}", idx + 1, line.trim());
            skipped_lines.push(idx + 1);
            continue;
        };
        let Some(path) = store_path(raw_path, prefix) else {
            continue;
        };
        if path.is_empty() {
            continue;
        }
        if raw_path.ends_with('/') {
            dirs.push(path);
        } else {
            files.push(StoredFile {
                path,
                size_bytes: size,
                modified: Some(modified),
            });
        }
    }

    ObjectListing {
        listing: Listing::new(files, dirs),
        skipped_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
2025-12-22 06:10      48213  s3://backups/2025/December/PG_gis_gis.22-December-2025-06-09.dmp.gz
2025-12-22 06:10         64  s3://backups/2025/December/PG_gis_gis.22-December-2025-06-09.dmp.gz.sha256
                       DIR   s3://backups/2025/
this is not a listing line
2025-12-01 00:01        512  s3://backups/globals.sql
";

    #[test]
    fn test_parses_objects_and_skips_garbage() {
        let parsed = parse_object_listing(SAMPLE, None);
        let paths: Vec<&str> = parsed.listing.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "2025/December/PG_gis_gis.22-December-2025-06-09.dmp.gz",
                "2025/December/PG_gis_gis.22-December-2025-06-09.dmp.gz.sha256",
                "globals.sql",
            ]
        );
        assert_eq!(parsed.listing.files[0].size_bytes, 48213);
        assert_eq!(parsed.skipped_lines, vec![3, 4]);
        assert!(parsed.listing.dirs.contains(&"2025/December".to_string()));
    }

    #[test]
    fn test_prefix_is_stripped_and_foreign_keys_dropped() {
        let text = "\
2025-12-22 06:10  10  s3://bucket/prod/a.dmp
2025-12-22 06:10  10  s3://bucket/staging/b.dmp
";
        let parsed = parse_object_listing(text, Some("prod/"));
        assert_eq!(parsed.listing.files.len(), 1);
        assert_eq!(parsed.listing.files[0].path, "a.dmp");
        assert!(parsed.skipped_lines.is_empty());
    }

    #[test]
    fn test_parse_object_line_rejects_bad_timestamp() {
        assert!(parse_object_line("2025-13-40 06:10 10 s3://b/a").is_none());
        assert!(parse_object_line("2025-12-22 06:10 ten s3://b/a").is_none());
        let (_, size, path) = parse_object_line("2025-12-22 06:10 10 s3://b/a b.dmp").unwrap();
        assert_eq!(size, 10);
        assert_eq!(path, "s3://b/a b.dmp");
    }
}
