//! Ingestion pipelines and their sync state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::age::{AgeLabel, classify_age};

/// One independent data-ingestion process tracked for sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Members,
    Bills,
    Votes,
    Funding,
    Scores,
}

impl Pipeline {
    pub const ALL: [Pipeline; 5] = [
        Pipeline::Members,
        Pipeline::Bills,
        Pipeline::Votes,
        Pipeline::Funding,
        Pipeline::Scores,
    ];

    /// Row id used by the sync status table.
    pub fn as_str(self) -> &'static str {
        match self {
            Pipeline::Members => "members",
            Pipeline::Bills => "bills",
            Pipeline::Votes => "votes",
            Pipeline::Funding => "funding",
            Pipeline::Scores => "scores",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Pipeline::Members => "legislator records",
            Pipeline::Bills => "bills",
            Pipeline::Votes => "roll-call votes",
            Pipeline::Funding => "funding records",
            Pipeline::Scores => "computed scores",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pipeline::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownPipeline(s.to_string()))
    }
}

/// Sync state of a pipeline as reported by the backing store.
///
/// The store's labels are not fixed; common spellings are folded into the
/// four known states and anything else decodes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[serde(alias = "idle", alias = "queued")]
    Pending,
    #[serde(alias = "in_progress", alias = "syncing")]
    Running,
    #[serde(alias = "completed", alias = "success")]
    Complete,
    #[serde(alias = "failed", alias = "failure")]
    Error,
    #[serde(other)]
    Unknown,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Complete => "complete",
            SyncStatus::Error => "error",
            SyncStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the sync status table, exactly as the store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSyncRow {
    pub id: String,
    pub status: SyncStatus,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "total")]
    pub total_records: Option<u64>,
}

/// Validated sync state of one pipeline.
///
/// A `Complete` record always carries a `last_synced_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    status: SyncStatus,
    last_synced_at: Option<DateTime<Utc>>,
    total: Option<u64>,
}

impl SyncRecord {
    pub fn new(
        status: SyncStatus,
        last_synced_at: Option<DateTime<Utc>>,
        total: Option<u64>,
    ) -> Result<Self, CoreError> {
        Self::checked("<unnamed>", status, last_synced_at, total)
    }

    /// Record for a pipeline the store has no row for.
    pub fn never_synced() -> Self {
        Self {
            status: SyncStatus::Pending,
            last_synced_at: None,
            total: None,
        }
    }

    fn checked(
        id: &str,
        status: SyncStatus,
        last_synced_at: Option<DateTime<Utc>>,
        total: Option<u64>,
    ) -> Result<Self, CoreError> {
        if status == SyncStatus::Complete && last_synced_at.is_none() {
            return Err(CoreError::CompleteWithoutTimestamp { id: id.to_string() });
        }
        Ok(Self {
            status,
            last_synced_at,
            total,
        })
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn age(&self, now: DateTime<Utc>) -> AgeLabel {
        classify_age(self.last_synced_at, now)
    }
}

impl TryFrom<RawSyncRow> for SyncRecord {
    type Error = CoreError;

    fn try_from(row: RawSyncRow) -> Result<Self, Self::Error> {
        Self::checked(&row.id, row.status, row.last_synced_at, row.total_records)
    }
}

/// Presentation row for one pipeline at a given "now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineView {
    pub pipeline: Pipeline,
    pub status: SyncStatus,
    pub age: AgeLabel,
    pub total: Option<u64>,
}

/// Consolidated sync state across the tracked pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessSnapshot {
    pipelines: BTreeMap<Pipeline, SyncRecord>,
    last_updated: Option<DateTime<Utc>>,
}

impl FreshnessSnapshot {
    /// Build a snapshot; `last_updated` is the latest `last_synced_at` of any pipeline.
    pub fn from_records(records: impl IntoIterator<Item = (Pipeline, SyncRecord)>) -> Self {
        let pipelines: BTreeMap<_, _> = records.into_iter().collect();
        let last_updated = pipelines.values().filter_map(|r| r.last_synced_at).max();
        Self {
            pipelines,
            last_updated,
        }
    }

    pub fn get(&self, pipeline: Pipeline) -> Option<&SyncRecord> {
        self.pipelines.get(&pipeline)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = (Pipeline, &SyncRecord)> {
        self.pipelines.iter().map(|(p, r)| (*p, r))
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Pipelines whose last run ended in error.
    pub fn errored(&self) -> Vec<Pipeline> {
        self.pipelines
            .iter()
            .filter(|(_, r)| r.status == SyncStatus::Error)
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn views(&self, now: DateTime<Utc>) -> Vec<PipelineView> {
        self.pipelines
            .iter()
            .map(|(pipeline, record)| PipelineView {
                pipeline: *pipeline,
                status: record.status,
                age: record.age(now),
                total: record.total,
            })
            .collect()
    }
}
