// dumpkeeper/src/archive/tier.rs
use chrono::{Datelike, Duration, NaiveDateTime};
use serde::Serialize;

use crate::config::RetentionPolicy;

/// Retention category derived from the calendar position of a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Monthly,
    Yearly,
}

/// Assigns the tier purely from the capture timestamp.
pub fn classify(captured_at: NaiveDateTime) -> Tier {
    match (captured_at.month(), captured_at.day()) {
        (1, 1) => Tier::Yearly,
        (_, 1) => Tier::Monthly,
        _ => Tier::Daily,
    }
}

/// Expiry window of a tier in whole days.
///
/// Months count as 30.5 days and years as 365.25 days, rounded up, so the
/// result is a plain integer and identical on every run.
pub fn window_days(tier: Tier, policy: &RetentionPolicy) -> i64 {
    match tier {
        Tier::Daily => i64::from(policy.daily_window_days),
        // ceil(m * 30.5) == ceil(61m / 2)
        Tier::Monthly => (i64::from(policy.monthly_window_months) * 61 + 1) / 2,
        // ceil(y * 365.25) == ceil(1461y / 4)
        Tier::Yearly => (i64::from(policy.yearly_window_years) * 1461 + 3) / 4,
    }
}

/// True when the entry is older than its tier allows.
pub fn is_expired(captured_at: NaiveDateTime, policy: &RetentionPolicy, now: NaiveDateTime) -> bool {
    let window = Duration::days(window_days(classify(captured_at), policy));
    now - captured_at > window
}
