//! Card display for freshness snapshots and completeness records.
//!
//! Cards implement `Display`, so the layout can be checked without a
//! terminal; `print_*` wrappers write them to stdout.

use std::fmt;

use chrono::{DateTime, Utc};

use civicsync_core::{CompletenessRecord, FreshnessSnapshot, SyncStatus, classify_age};

const LABEL_WIDTH: usize = 18;

// ── Public API ──

pub fn print_snapshot(snapshot: &FreshnessSnapshot, now: DateTime<Utc>) {
    print!("{}", SnapshotCard { snapshot, now });
}

pub fn print_completeness(entity_id: &str, record: Option<&CompletenessRecord>, now: DateTime<Utc>) {
    print!(
        "{}",
        CompletenessCard {
            entity_id,
            record,
            now,
        }
    );
}

/// A snapshot as a card: overall age, then one line per pipeline.
pub struct SnapshotCard<'a> {
    pub snapshot: &'a FreshnessSnapshot,
    pub now: DateTime<Utc>,
}

impl fmt::Display for SnapshotCard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Data freshness ===")?;
        writeln!(
            f,
            "Last updated: {}",
            with_timestamp(self.snapshot.last_updated(), self.now)
        )?;
        writeln!(f)?;

        writeln!(f, "── Pipelines ──")?;
        for view in self.snapshot.views(self.now) {
            let total = view
                .total
                .map(|t| format!("{t} records"))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "  {:<10} {} {:<9} {:<12} {:<14} {}",
                view.pipeline.as_str(),
                status_mark(view.status),
                view.status.as_str(),
                view.age.to_string(),
                total,
                view.pipeline.description(),
            )?;
        }

        let errored = self.snapshot.errored();
        if !errored.is_empty() {
            let names: Vec<&str> = errored.iter().map(|p| p.as_str()).collect();
            writeln!(f)?;
            writeln!(f, "Last run failed: {}", names.join(", "))?;
        }
        Ok(())
    }
}

/// One entity's completeness. A `None` record means the entity has not been
/// validated yet.
pub struct CompletenessCard<'a> {
    pub entity_id: &'a str,
    pub record: Option<&'a CompletenessRecord>,
    pub now: DateTime<Utc>,
}

impl fmt::Display for CompletenessCard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Completeness: {} ===", self.entity_id)?;
        let Some(record) = self.record else {
            return writeln!(f, "Not validated yet");
        };

        writeln!(
            f,
            "{}% complete ({}/7 dimensions)",
            trim_percentage(record.completeness_percentage),
            record.passing_dimensions(),
        )?;
        writeln!(
            f,
            "Last validated: {}",
            with_timestamp(record.last_validated_at, self.now)
        )?;
        writeln!(f)?;

        writeln!(f, "── Dimensions ──")?;
        for (name, ok) in record.dimensions() {
            writeln!(f, "  {:<LABEL_WIDTH$} {}", name, if ok { "yes" } else { "no" })?;
        }

        if !record.missing_fields.is_empty() {
            writeln!(f)?;
            writeln!(f, "── Missing fields ──")?;
            for field in &record.missing_fields {
                writeln!(f, "  {field}")?;
            }
        }
        Ok(())
    }
}

// ── Helpers ──

fn status_mark(status: SyncStatus) -> char {
    match status {
        SyncStatus::Complete => '✓',
        SyncStatus::Running => '…',
        SyncStatus::Pending => '·',
        SyncStatus::Error => '✗',
        SyncStatus::Unknown => '?',
    }
}

fn with_timestamp(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let label = classify_age(timestamp, now);
    match timestamp {
        Some(ts) => format!("{label} ({})", ts.format("%Y-%m-%d %H:%M UTC")),
        None => label.to_string(),
    }
}

/// `85.0` prints as `85`, `85.714` as `85.71`.
fn trim_percentage(value: f64) -> String {
    let s = format!("{value:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
