use std::time::Duration;

/// Refresh cadence and staleness windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// How often a subscribed freshness snapshot is refetched.
    pub refetch_interval: Duration,
    /// Age after which a cached snapshot is revalidated on access.
    pub stale_time: Duration,
    /// Age after which a cached completeness record is revalidated on access.
    /// Zero revalidates on every access (the cached record is still served).
    pub completeness_stale_time: Duration,
    /// Interval refetch for subscribed completeness records; `None` disables it.
    pub completeness_refetch_interval: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            refetch_interval: Duration::from_secs(60),
            stale_time: Duration::from_secs(30),
            completeness_stale_time: Duration::ZERO,
            completeness_refetch_interval: None,
        }
    }
}
