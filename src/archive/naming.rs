// dumpkeeper/src/archive/naming.rs
use chrono::{Month, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Suffix of checksum sidecar files.
pub const SIDECAR_SUFFIX: &str = ".sha256";

/// Extension of compressed archives that must carry a sidecar.
pub const COMPRESSED_SUFFIX: &str = ".gz";

// <prefix>_<database>.<DD>-<MonthName>-<YYYY>[-<HH>-<MM>].<dmp|sql|gz>[.gz][.sha256]
static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<prefix>[^_/]+)_(?P<database>[^/]+)\.(?P<day>\d{2})-(?P<month>[A-Za-z]+)-(?P<year>\d{4})(?:-(?P<hour>\d{2})-(?P<minute>\d{2}))?\.(?P<ext>(?:dmp|sql|gz)(?:\.gz)?(?:\.sha256)?)$",
    )
    .expect("archive name pattern is a valid regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name does not follow the dump naming convention: {0}")]
    PatternMismatch(String),

    #[error("unknown month name '{0}'")]
    InvalidMonth(String),

    #[error("invalid calendar date {day:02}-{month}-{year}")]
    InvalidDate { day: u32, month: String, year: i32 },

    #[error("invalid time of day {hour:02}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },
}

/// Components recovered from a dump archive's file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub prefix: String,
    pub database: String,
    pub captured_at: NaiveDateTime,
    pub extension: String,
}

impl ParsedName {
    /// Identifier of the dump series, `<prefix>_<database>`.
    pub fn database_id(&self) -> String {
        format!("{}_{}", self.prefix, self.database)
    }

    /// Database part of the name when the dump was written under `prefix`.
    ///
    /// `prefix` may itself contain `_` (`PG_prod` matches `PG_prod_gis`), so
    /// the check runs on the whole series identifier rather than on the
    /// first `_`-separated field.
    pub fn database_under(&self, prefix: &str) -> Option<String> {
        let series = self.database_id();
        series
            .strip_prefix(prefix)?
            .strip_prefix('_')
            .filter(|database| !database.is_empty())
            .map(str::to_string)
    }

    pub fn is_sidecar(&self) -> bool {
        self.extension.ends_with("sha256")
    }
}

/// Parses a bare file name such as `PG_gis_gis.22-December-2025-06-09.dmp.gz`.
///
/// A name without the `-HH-MM` part is taken as captured at midnight.
pub fn parse_archive_name(name: &str) -> Result<ParsedName, NameError> {
    let caps = ARCHIVE_NAME
        .captures(name)
        .ok_or_else(|| NameError::PatternMismatch(name.to_string()))?;

    // The pattern guarantees the digit groups, so these parses cannot overflow.
    let day: u32 = caps["day"].parse().unwrap_or(0);
    let year: i32 = caps["year"].parse().unwrap_or(0);
    let month_name = &caps["month"];
    let month = Month::from_str(month_name)
        .map_err(|_| NameError::InvalidMonth(month_name.to_string()))?;

    let date = NaiveDate::from_ymd_opt(year, month.number_from_month(), day).ok_or_else(|| {
        NameError::InvalidDate {
            day,
            month: month_name.to_string(),
            year,
        }
    })?;

    let (hour, minute) = match (caps.name("hour"), caps.name("minute")) {
        (Some(h), Some(m)) => (h.as_str().parse().unwrap_or(99), m.as_str().parse().unwrap_or(99)),
        _ => (0, 0),
    };
    let captured_at = date
        .and_hms_opt(hour, minute, 0)
        .ok_or(NameError::InvalidTime { hour, minute })?;

    Ok(ParsedName {
        prefix: caps["prefix"].to_string(),
        database: caps["database"].to_string(),
        captured_at,
        extension: caps["ext"].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_full_name_with_time() {
        let parsed = parse_archive_name("PG_gis_gis.22-December-2025-06-09.dmp.gz").unwrap();
        assert_eq!(parsed.prefix, "PG");
        assert_eq!(parsed.database, "gis_gis");
        assert_eq!(parsed.database_id(), "PG_gis_gis");
        assert_eq!(parsed.extension, "dmp.gz");
        assert_eq!(parsed.captured_at.date(), NaiveDate::from_ymd_opt(2025, 12, 22).unwrap());
        assert_eq!((parsed.captured_at.hour(), parsed.captured_at.minute()), (6, 9));
        assert!(!parsed.is_sidecar());
    }

    #[test]
    fn test_parse_name_without_time_is_midnight() {
        let parsed = parse_archive_name("PG_gis.01-March-2025.dmp").unwrap();
        assert_eq!(parsed.database, "gis");
        assert_eq!(parsed.captured_at.month(), 3);
        assert_eq!(parsed.captured_at.hour(), 0);
    }

    #[test]
    fn test_database_under_prefix() {
        let parsed = parse_archive_name("PG_prod_gis.01-March-2020.dmp").unwrap();
        assert_eq!(parsed.database_under("PG").as_deref(), Some("prod_gis"));
        assert_eq!(parsed.database_under("PG_prod").as_deref(), Some("gis"));
        assert_eq!(parsed.database_under("PG_pro"), None);
        assert_eq!(parsed.database_under("PG_prod_gis"), None);
        assert_eq!(parsed.database_under("MY"), None);
    }

    #[test]
    fn test_parse_sidecar() {
        let parsed = parse_archive_name("PG_gis_gis.22-December-2025-06-09.dmp.gz.sha256").unwrap();
        assert!(parsed.is_sidecar());
        assert_eq!(parsed.extension, "dmp.gz.sha256");
    }

    #[test]
    fn test_rejects_unrelated_files() {
        assert!(matches!(
            parse_archive_name("globals.sql"),
            Err(NameError::PatternMismatch(_))
        ));
        assert!(parse_archive_name("README.txt").is_err());
        assert!(parse_archive_name("PG_gis.22-December-2025-06-09.tar").is_err());
    }

    #[test]
    fn test_rejects_invalid_calendar_values() {
        assert!(matches!(
            parse_archive_name("PG_gis.31-February-2025.dmp"),
            Err(NameError::InvalidDate { .. })
        ));
        assert!(matches!(
            parse_archive_name("PG_gis.01-Smarch-2025.dmp"),
            Err(NameError::InvalidMonth(_))
        ));
        assert!(matches!(
            parse_archive_name("PG_gis.01-March-2025-25-00.dmp"),
            Err(NameError::InvalidTime { hour: 25, minute: 0 })
        ));
    }
}
