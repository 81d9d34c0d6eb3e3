use thiserror::Error;

use civicsync_core::Pipeline;
use civicsync_store::StoreError;

/// A collaborator read failed. Not retried here; pollers retry on their next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch sync record for {pipeline}: {source}")]
    SyncRecord {
        pipeline: Pipeline,
        source: StoreError,
    },

    #[error("failed to fetch completeness for {entity_id}: {source}")]
    Completeness {
        entity_id: String,
        source: StoreError,
    },
}

impl FetchError {
    pub fn store_error(&self) -> &StoreError {
        match self {
            FetchError::SyncRecord { source, .. } | FetchError::Completeness { source, .. } => {
                source
            }
        }
    }
}
