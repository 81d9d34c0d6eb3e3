use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{info, warn};

use civicsync_core::{FreshnessSnapshot, Pipeline, SyncRecord};
use civicsync_store::SyncRecordStore;

use crate::FetchError;

/// Reads the sync record of every tracked pipeline and folds them into one
/// [`FreshnessSnapshot`].
///
/// The read is all-or-nothing: if any pipeline's read fails, no snapshot is
/// returned. A pipeline whose run ended in error is not a failed read; it is
/// reported with status `error` next to the others.
pub struct FreshnessAggregator<S: ?Sized> {
    store: Arc<S>,
    pipelines: Vec<Pipeline>,
}

impl<S: SyncRecordStore + ?Sized> FreshnessAggregator<S> {
    /// Track all five pipelines.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            pipelines: Pipeline::ALL.to_vec(),
        }
    }

    /// Restrict the tracked set.
    pub fn with_pipelines(mut self, pipelines: impl IntoIterator<Item = Pipeline>) -> Self {
        let mut pipelines: Vec<_> = pipelines.into_iter().collect();
        pipelines.sort();
        pipelines.dedup();
        self.pipelines = pipelines;
        self
    }

    /// Tracked pipelines, sorted.
    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub async fn fetch_snapshot(&self) -> Result<FreshnessSnapshot, FetchError> {
        let reads = self.pipelines.iter().map(|&pipeline| async move {
            let record = self
                .store
                .get_sync_record(pipeline)
                .await
                .map_err(|source| FetchError::SyncRecord { pipeline, source })?;
            Ok::<_, FetchError>((pipeline, record.unwrap_or_else(SyncRecord::never_synced)))
        });

        let records = try_join_all(reads).await.inspect_err(|e| {
            warn!(error = %e, "freshness snapshot failed");
        })?;
        let snapshot = FreshnessSnapshot::from_records(records);
        info!(
            pipelines = snapshot.len(),
            errored = snapshot.errored().len(),
            last_updated = ?snapshot.last_updated(),
            "fetched freshness snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use civicsync_core::{RawSyncRow, SyncStatus};
    use civicsync_store::{MemoryStore, StoreError};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn row(pipeline: Pipeline, status: SyncStatus, ago: Option<Duration>) -> RawSyncRow {
        RawSyncRow {
            id: pipeline.as_str().into(),
            status,
            last_synced_at: ago.map(|d| now() - d),
            total_records: None,
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .put_sync_row(RawSyncRow {
                total_records: Some(538),
                ..row(Pipeline::Members, SyncStatus::Complete, Some(Duration::minutes(12)))
            })
            .await;
        store
            .put_sync_row(row(Pipeline::Bills, SyncStatus::Complete, Some(Duration::hours(3))))
            .await;
        store
            .put_sync_row(row(Pipeline::Votes, SyncStatus::Error, None))
            .await;
        store
            .put_sync_row(row(Pipeline::Funding, SyncStatus::Running, Some(Duration::days(2))))
            .await;
        store
            .put_sync_row(row(Pipeline::Scores, SyncStatus::Complete, Some(Duration::seconds(20))))
            .await;
        store
    }

    #[tokio::test]
    async fn errored_pipeline_does_not_corrupt_others() {
        let store = seeded_store().await;
        let snapshot = FreshnessAggregator::new(store.clone())
            .fetch_snapshot()
            .await
            .unwrap();

        let votes = snapshot.get(Pipeline::Votes).unwrap();
        assert_eq!(votes.status(), SyncStatus::Error);
        assert_eq!(votes.age(now()).to_string(), "Never");

        let labels: Vec<String> = snapshot
            .views(now())
            .iter()
            .map(|v| format!("{}={}", v.pipeline, v.age))
            .collect();
        assert_eq!(
            labels,
            vec![
                "members=12 min ago",
                "bills=3h ago",
                "votes=Never",
                "funding=2d ago",
                "scores=Just now",
            ]
        );
        assert_eq!(snapshot.get(Pipeline::Members).unwrap().total(), Some(538));
        assert_eq!(snapshot.last_updated(), Some(now() - Duration::seconds(20)));
        assert_eq!(store.sync_calls(), 5);
    }

    #[tokio::test]
    async fn missing_rows_read_as_never_synced() {
        let store = Arc::new(MemoryStore::new());
        let snapshot = FreshnessAggregator::new(store).fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 5);
        for (_, record) in snapshot.pipelines() {
            assert_eq!(record, &SyncRecord::never_synced());
        }
        assert_eq!(snapshot.last_updated(), None);
    }

    #[tokio::test]
    async fn store_failure_fails_whole_snapshot() {
        let store = seeded_store().await;
        store.set_failure(Some("timeout")).await;
        let err = FreshnessAggregator::new(store)
            .fetch_snapshot()
            .await
            .unwrap_err();
        assert!(matches!(err.store_error(), StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn one_invalid_row_fails_whole_snapshot() {
        let store = seeded_store().await;
        store
            .put_sync_row(row(Pipeline::Funding, SyncStatus::Complete, None))
            .await;
        let err = FreshnessAggregator::new(store)
            .fetch_snapshot()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::SyncRecord {
                pipeline: Pipeline::Funding,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn restricted_pipeline_set() {
        let store = seeded_store().await;
        let aggregator = FreshnessAggregator::new(store.clone())
            .with_pipelines([Pipeline::Votes, Pipeline::Members, Pipeline::Votes]);
        assert_eq!(aggregator.pipelines(), &[Pipeline::Members, Pipeline::Votes]);

        let snapshot = aggregator.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get(Pipeline::Bills).is_none());
        assert_eq!(store.sync_calls(), 2);
    }
}
