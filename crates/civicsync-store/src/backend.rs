use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use civicsync_core::{Pipeline, RawCompleteness, SyncRecord, SyncStatus};

use crate::StoreError;

/// Read access to the per-pipeline sync status table.
#[async_trait]
pub trait SyncRecordStore: Send + Sync {
    /// Fetch the sync record for one pipeline. `Ok(None)` when the table has
    /// no row for it.
    async fn get_sync_record(&self, pipeline: Pipeline) -> Result<Option<SyncRecord>, StoreError>;
}

/// Read access to the per-entity completeness table.
#[async_trait]
pub trait CompletenessStore: Send + Sync {
    /// Fetch at most one completeness row for `entity_id`.
    async fn get_completeness(&self, entity_id: &str)
    -> Result<Option<RawCompleteness>, StoreError>;
}

/// Write access to the sync status table.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Insert or replace the status row keyed by `row.id`.
    async fn upsert_status(&self, row: StatusUpsert) -> Result<(), StoreError>;
}

/// Full status row as written by jobs and edge functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpsert {
    pub id: String,
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
}
