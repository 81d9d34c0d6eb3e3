//! Polling client: stale-while-revalidate caching, request de-duplication and
//! interval refresh on top of the freshness aggregator and completeness evaluator.

mod cache;
mod client;
mod config;

pub use cache::{QueryCache, QueryError, QueryKey, QueryState};
pub use client::{PollingClient, Subscription};
pub use config::PollConfig;
