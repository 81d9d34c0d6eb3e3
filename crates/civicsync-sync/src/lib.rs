//! Sync layer: consolidated freshness snapshots, per-entity completeness, and
//! the HTTP transport to the backing store.

mod completeness;
mod error;
mod freshness;

#[cfg(feature = "http")]
pub mod http;

pub use completeness::{CompletenessEvaluator, entity_key};
pub use error::FetchError;
pub use freshness::FreshnessAggregator;

#[cfg(feature = "http")]
pub use http::{RestClient, SyncError};
