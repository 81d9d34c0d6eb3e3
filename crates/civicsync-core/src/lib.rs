pub mod age;
pub mod completeness;
pub mod error;
pub mod pipeline;

pub use age::{AgeLabel, classify_age, classify_age_now};
pub use completeness::{CompletenessRecord, RawCompleteness, RawPercentage};
pub use error::CoreError;
pub use pipeline::{FreshnessSnapshot, Pipeline, PipelineView, RawSyncRow, SyncRecord, SyncStatus};
