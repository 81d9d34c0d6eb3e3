use std::sync::Arc;

use tracing::{debug, info};

use civicsync_core::CompletenessRecord;
use civicsync_store::{CompletenessStore, StoreError};

use crate::FetchError;

/// Normalize an entity identifier; `None` when the evaluator should stay idle.
pub fn entity_key(entity_id: Option<&str>) -> Option<&str> {
    entity_id.map(str::trim).filter(|id| !id.is_empty())
}

/// Looks up and normalizes the completeness record of one tracked entity.
pub struct CompletenessEvaluator<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CompletenessStore + ?Sized> CompletenessEvaluator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Evaluate `entity_id`.
    ///
    /// Returns `Ok(None)` without touching the store when the id is absent or
    /// blank, and `Ok(None)` when the entity has not been validated yet.
    pub async fn evaluate(
        &self,
        entity_id: Option<&str>,
    ) -> Result<Option<CompletenessRecord>, FetchError> {
        let Some(entity_id) = entity_key(entity_id) else {
            debug!("no entity id, completeness evaluation skipped");
            return Ok(None);
        };

        let fail = |source: StoreError| FetchError::Completeness {
            entity_id: entity_id.to_string(),
            source,
        };

        let Some(raw) = self.store.get_completeness(entity_id).await.map_err(fail)? else {
            info!(entity_id, "entity not yet validated");
            return Ok(None);
        };
        let record = CompletenessRecord::try_from(raw)
            .map_err(StoreError::from)
            .map_err(fail)?;
        info!(
            entity_id,
            percentage = record.completeness_percentage,
            missing = record.missing_fields.len(),
            "evaluated completeness"
        );
        Ok(Some(record))
    }
}
