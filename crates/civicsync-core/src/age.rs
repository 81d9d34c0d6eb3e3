//! Human-readable age labels for sync timestamps.
//!
//! Elapsed time is bucketed by fixed breakpoints, checked in ascending order:
//!
//! | elapsed          | label           |
//! |------------------|-----------------|
//! | no timestamp     | `Never`         |
//! | < 1 minute       | `Just now`      |
//! | < 60 minutes     | `{n} min ago`   |
//! | < 24 hours       | `{n}h ago`      |
//! | < 7 days         | `{n}d ago`      |
//! | otherwise        | `M/D/YYYY`      |
//!
//! Counts are floor-divided from milliseconds. A breakpoint value belongs to
//! the next bucket: exactly 60 000 ms is `1 min ago`.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

/// Staleness bucket for a timestamp relative to some "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeLabel {
    Never,
    JustNow,
    Minutes(i64),
    Hours(i64),
    Days(i64),
    /// Older than a week; rendered as the calendar date of the timestamp.
    Date(NaiveDate),
}

impl fmt::Display for AgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeLabel::Never => f.write_str("Never"),
            AgeLabel::JustNow => f.write_str("Just now"),
            AgeLabel::Minutes(n) => write!(f, "{n} min ago"),
            AgeLabel::Hours(n) => write!(f, "{n}h ago"),
            AgeLabel::Days(n) => write!(f, "{n}d ago"),
            AgeLabel::Date(date) => write!(f, "{}", date.format("%-m/%-d/%Y")),
        }
    }
}

impl Serialize for AgeLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Classify how long ago `timestamp` was, relative to `now`.
///
/// Timestamps in the future count as `Just now`.
pub fn classify_age(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> AgeLabel {
    let Some(ts) = timestamp else {
        return AgeLabel::Never;
    };
    let elapsed = now.signed_duration_since(ts).num_milliseconds();

    if elapsed < MINUTE_MS {
        AgeLabel::JustNow
    } else if elapsed < HOUR_MS {
        AgeLabel::Minutes(elapsed / MINUTE_MS)
    } else if elapsed < DAY_MS {
        AgeLabel::Hours(elapsed / HOUR_MS)
    } else if elapsed < WEEK_MS {
        AgeLabel::Days(elapsed / DAY_MS)
    } else {
        AgeLabel::Date(ts.date_naive())
    }
}

/// [`classify_age`] against the current wall clock.
pub fn classify_age_now(timestamp: Option<DateTime<Utc>>) -> AgeLabel {
    classify_age(timestamp, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn label_for(elapsed: Duration) -> String {
        classify_age(Some(now() - elapsed), now()).to_string()
    }

    #[test]
    fn null_timestamp_is_never() {
        assert_eq!(classify_age(None, now()), AgeLabel::Never);
        assert_eq!(classify_age(None, now()).to_string(), "Never");
    }

    #[test]
    fn zero_elapsed_is_just_now() {
        assert_eq!(label_for(Duration::zero()), "Just now");
    }

    #[test]
    fn minute_boundary() {
        assert_eq!(label_for(Duration::milliseconds(59_999)), "Just now");
        assert_eq!(label_for(Duration::milliseconds(60_000)), "1 min ago");
    }

    #[test]
    fn seconds_examples() {
        assert_eq!(label_for(Duration::seconds(59)), "Just now");
        assert_eq!(label_for(Duration::seconds(61)), "1 min ago");
        assert_eq!(label_for(Duration::seconds(3661)), "1h ago");
    }

    #[test]
    fn minutes_are_floored() {
        assert_eq!(label_for(Duration::seconds(119)), "1 min ago");
        assert_eq!(label_for(Duration::milliseconds(HOUR_MS - 1)), "59 min ago");
    }

    #[test]
    fn hour_and_day_boundaries() {
        assert_eq!(label_for(Duration::milliseconds(HOUR_MS)), "1h ago");
        assert_eq!(label_for(Duration::milliseconds(DAY_MS - 1)), "23h ago");
        assert_eq!(label_for(Duration::milliseconds(DAY_MS)), "1d ago");
        assert_eq!(label_for(Duration::milliseconds(WEEK_MS - 1)), "6d ago");
    }

    #[test]
    fn a_week_or_more_is_a_date() {
        let week = classify_age(Some(now() - Duration::days(7)), now());
        assert_eq!(week, AgeLabel::Date(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()));
        assert_eq!(week.to_string(), "3/7/2026");

        assert_eq!(label_for(Duration::days(8)), "3/6/2026");
    }

    #[test]
    fn future_timestamp_is_just_now() {
        assert_eq!(label_for(Duration::minutes(-5)), "Just now");
    }

    #[test]
    fn serializes_as_label_text() {
        let json = serde_json::to_string(&AgeLabel::Hours(3)).unwrap();
        assert_eq!(json, "\"3h ago\"");
    }
}
