//! In-process store for offline runs and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use civicsync_core::{Pipeline, RawCompleteness, RawSyncRow, SyncRecord};

use crate::{CompletenessStore, StatusUpsert, StatusWriter, StoreError, SyncRecordStore};

/// JSON fixture layout, named after the backing tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub sync_status: Vec<RawSyncRow>,
    #[serde(default)]
    pub data_completeness: Vec<RawCompleteness>,
}

/// Store holding rows in memory.
///
/// Rows are kept in their raw form and validated on every read, the same way
/// rows coming over the wire are. Reads can be slowed down or made to fail,
/// and every call is counted.
#[derive(Default)]
pub struct MemoryStore {
    sync_rows: Mutex<HashMap<String, RawSyncRow>>,
    completeness: Mutex<HashMap<String, RawCompleteness>>,
    upserts: Mutex<Vec<StatusUpsert>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    sync_calls: AtomicU64,
    completeness_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let sync_rows = fixture
            .sync_status
            .into_iter()
            .map(|row| (row.id.clone(), row))
            .collect();
        let completeness = fixture
            .data_completeness
            .into_iter()
            .map(|row| (row.bioguide_id.clone(), row))
            .collect();
        Self {
            sync_rows: Mutex::new(sync_rows),
            completeness: Mutex::new(completeness),
            ..Self::default()
        }
    }

    /// Load a JSON [`Fixture`] from disk.
    pub async fn load_fixture(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::FixtureNotFound(path.to_path_buf()));
        }
        let bytes = tokio::fs::read(path).await?;
        let fixture: Fixture = serde_json::from_slice(&bytes)?;
        info!(
            path = %path.display(),
            sync_rows = fixture.sync_status.len(),
            completeness_rows = fixture.data_completeness.len(),
            "loaded fixture"
        );
        Ok(Self::from_fixture(fixture))
    }

    pub async fn put_sync_row(&self, row: RawSyncRow) {
        self.sync_rows.lock().await.insert(row.id.clone(), row);
    }

    pub async fn put_completeness(&self, row: RawCompleteness) {
        self.completeness
            .lock()
            .await
            .insert(row.bioguide_id.clone(), row);
    }

    pub async fn remove_completeness(&self, entity_id: &str) {
        self.completeness.lock().await.remove(entity_id);
    }

    /// Make every read and write fail with `StoreError::Unavailable(reason)`; `None` heals the store.
    pub async fn set_failure(&self, reason: Option<&str>) {
        *self.failure.lock().await = reason.map(str::to_string);
    }

    /// Sleep this long inside every read.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    pub fn sync_calls(&self) -> u64 {
        self.sync_calls.load(Ordering::Relaxed)
    }

    pub fn completeness_calls(&self) -> u64 {
        self.completeness_calls.load(Ordering::Relaxed)
    }

    /// Status rows written through [`StatusWriter`], oldest first.
    pub async fn upserts(&self) -> Vec<StatusUpsert> {
        self.upserts.lock().await.clone()
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().await.as_ref() {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncRecordStore for MemoryStore {
    async fn get_sync_record(&self, pipeline: Pipeline) -> Result<Option<SyncRecord>, StoreError> {
        self.sync_calls.fetch_add(1, Ordering::Relaxed);
        self.before_read().await?;
        let row = self.sync_rows.lock().await.get(pipeline.as_str()).cloned();
        debug!(%pipeline, found = row.is_some(), "memory sync record read");
        row.map(SyncRecord::try_from)
            .transpose()
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl CompletenessStore for MemoryStore {
    async fn get_completeness(
        &self,
        entity_id: &str,
    ) -> Result<Option<RawCompleteness>, StoreError> {
        self.completeness_calls.fetch_add(1, Ordering::Relaxed);
        self.before_read().await?;
        Ok(self.completeness.lock().await.get(entity_id).cloned())
    }
}

#[async_trait]
impl StatusWriter for MemoryStore {
    async fn upsert_status(&self, row: StatusUpsert) -> Result<(), StoreError> {
        if let Some(reason) = self.failure.lock().await.as_ref() {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        self.sync_rows.lock().await.insert(
            row.id.clone(),
            RawSyncRow {
                id: row.id.clone(),
                status: row.status,
                last_synced_at: row.last_synced_at,
                total_records: None,
            },
        );
        self.upserts.lock().await.push(row);
        Ok(())
    }
}
