use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use civicsync_core::{CompletenessRecord, FreshnessSnapshot};
use civicsync_store::{CompletenessStore, SyncRecordStore};
use civicsync_sync::{CompletenessEvaluator, FetchError, FreshnessAggregator, entity_key};

use crate::{PollConfig, QueryCache, QueryError, QueryKey, QueryState};

/// Cached, periodically refreshed access to freshness snapshots and
/// completeness records.
///
/// Caches are injected and may be shared between clients; two clients over
/// the same caches de-duplicate each other's requests.
pub struct PollingClient<S: ?Sized> {
    aggregator: Arc<FreshnessAggregator<S>>,
    evaluator: Arc<CompletenessEvaluator<S>>,
    freshness: QueryCache<FreshnessSnapshot>,
    completeness: QueryCache<Option<CompletenessRecord>>,
    freshness_key: QueryKey,
    config: PollConfig,
}

impl<S> PollingClient<S>
where
    S: SyncRecordStore + CompletenessStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, config: PollConfig) -> Self {
        Self::from_parts(
            FreshnessAggregator::new(Arc::clone(&store)),
            CompletenessEvaluator::new(store),
            config,
        )
    }

    pub fn from_parts(
        aggregator: FreshnessAggregator<S>,
        evaluator: CompletenessEvaluator<S>,
        config: PollConfig,
    ) -> Self {
        let freshness_key = QueryKey::freshness(aggregator.pipelines());
        Self {
            aggregator: Arc::new(aggregator),
            evaluator: Arc::new(evaluator),
            freshness: QueryCache::new(),
            completeness: QueryCache::new(),
            freshness_key,
            config,
        }
    }

    /// Use the given caches instead of private ones.
    pub fn with_caches(
        mut self,
        freshness: QueryCache<FreshnessSnapshot>,
        completeness: QueryCache<Option<CompletenessRecord>>,
    ) -> Self {
        self.freshness = freshness;
        self.completeness = completeness;
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn freshness_key(&self) -> &QueryKey {
        &self.freshness_key
    }

    fn snapshot_fetcher(
        aggregator: Arc<FreshnessAggregator<S>>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<FreshnessSnapshot, FetchError>> + Send + 'static
    {
        move || async move { aggregator.fetch_snapshot().await }.boxed()
    }

    fn completeness_fetcher(
        evaluator: Arc<CompletenessEvaluator<S>>,
        entity_id: String,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Option<CompletenessRecord>, FetchError>>
    + Send
    + 'static {
        move || async move { evaluator.evaluate(Some(&entity_id)).await }.boxed()
    }

    // ── Freshness ──

    /// Current snapshot, stale-while-revalidate. Waits only when nothing is cached.
    pub async fn freshness(&self) -> QueryState<FreshnessSnapshot> {
        self.freshness
            .load(
                &self.freshness_key,
                self.config.stale_time,
                Self::snapshot_fetcher(Arc::clone(&self.aggregator)),
            )
            .await
    }

    pub fn freshness_state(&self) -> QueryState<FreshnessSnapshot> {
        self.freshness
            .state(&self.freshness_key, self.config.stale_time)
    }

    /// Fetch a new snapshot now, superseding any request in flight.
    pub async fn refetch_freshness(&self) -> Result<FreshnessSnapshot, QueryError> {
        self.freshness
            .refetch(&self.freshness_key, Self::snapshot_fetcher(Arc::clone(&self.aggregator)))
            .await
    }

    /// Subscribe to the snapshot; it is refetched every `refetch_interval`
    /// until the subscription is dropped.
    pub fn watch_freshness(&self) -> Subscription<FreshnessSnapshot> {
        let key = self.freshness_key.clone();
        let updates = self.freshness.subscribe(&key);
        let ticker = spawn_ticker(
            self.freshness.clone(),
            key.clone(),
            self.config.stale_time,
            Some(self.config.refetch_interval),
            {
                let aggregator = Arc::clone(&self.aggregator);
                move || Self::snapshot_fetcher(Arc::clone(&aggregator))
            },
        );
        info!(key = %key, interval = ?self.config.refetch_interval, "watching freshness");
        Subscription::active(
            self.freshness.clone(),
            key,
            self.config.stale_time,
            updates,
            ticker,
        )
    }

    // ── Completeness ──

    /// Completeness of `entity_id`. `Idle` without any store call when the id
    /// is absent or blank; `Success { value: None, .. }` when the entity has
    /// not been validated yet.
    pub async fn completeness(
        &self,
        entity_id: Option<&str>,
    ) -> QueryState<Option<CompletenessRecord>> {
        let Some(entity_id) = entity_key(entity_id) else {
            return QueryState::Idle;
        };
        self.completeness
            .load(
                &QueryKey::completeness(entity_id),
                self.config.completeness_stale_time,
                Self::completeness_fetcher(Arc::clone(&self.evaluator), entity_id.to_string()),
            )
            .await
    }

    pub fn completeness_state(
        &self,
        entity_id: Option<&str>,
    ) -> QueryState<Option<CompletenessRecord>> {
        match entity_key(entity_id) {
            Some(entity_id) => self.completeness.state(
                &QueryKey::completeness(entity_id),
                self.config.completeness_stale_time,
            ),
            None => QueryState::Idle,
        }
    }

    /// Start fetching `entity_id` in the background. `false` when disabled.
    pub fn prefetch_completeness(&self, entity_id: Option<&str>) -> bool {
        let Some(entity_id) = entity_key(entity_id) else {
            return false;
        };
        self.completeness.prefetch(
            &QueryKey::completeness(entity_id),
            Self::completeness_fetcher(Arc::clone(&self.evaluator), entity_id.to_string()),
        );
        true
    }

    pub async fn refetch_completeness(
        &self,
        entity_id: Option<&str>,
    ) -> QueryState<Option<CompletenessRecord>> {
        let Some(entity_id) = entity_key(entity_id) else {
            return QueryState::Idle;
        };
        let key = QueryKey::completeness(entity_id);
        let result = self
            .completeness
            .refetch(
                &key,
                Self::completeness_fetcher(Arc::clone(&self.evaluator), entity_id.to_string()),
            )
            .await;
        match (self.completeness.state(&key, self.config.completeness_stale_time), result) {
            (state @ (QueryState::Success { .. } | QueryState::Error(_)), _) => state,
            (_, Err(err)) => QueryState::Error(err),
            (state, Ok(_)) => state,
        }
    }

    /// Subscribe to one entity's completeness. The subscription is inert
    /// (no task, no store call, always `Idle`) when the id is absent or blank.
    pub fn watch_completeness(
        &self,
        entity_id: Option<&str>,
    ) -> Subscription<Option<CompletenessRecord>> {
        let Some(entity_id) = entity_key(entity_id) else {
            debug!("no entity id, completeness subscription is inert");
            return Subscription::inert();
        };
        let key = QueryKey::completeness(entity_id);
        let updates = self.completeness.subscribe(&key);
        let ticker = spawn_ticker(
            self.completeness.clone(),
            key.clone(),
            self.config.completeness_stale_time,
            self.config.completeness_refetch_interval,
            {
                let evaluator = Arc::clone(&self.evaluator);
                let entity_id = entity_id.to_string();
                move || Self::completeness_fetcher(Arc::clone(&evaluator), entity_id.clone())
            },
        );
        Subscription::active(
            self.completeness.clone(),
            key,
            self.config.completeness_stale_time,
            updates,
            ticker,
        )
    }
}

/// Refresh `key` once if nothing fresh is cached, then every `interval`.
fn spawn_ticker<V, M, F, Fut>(
    cache: QueryCache<V>,
    key: QueryKey,
    stale_time: Duration,
    interval: Option<Duration>,
    make_fetcher: M,
) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
    M: Fn() -> F + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
{
    tokio::spawn(async move {
        cache.ensure_fresh(&key, stale_time, make_fetcher());
        let Some(period) = interval else {
            return;
        };
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let request_id = cache.prefetch(&key, make_fetcher());
            debug!(key = %key, request_id, "interval refetch");
        }
    })
}

/// A consumer's registration on one cache key.
///
/// Holds the interval task for the key. Dropping the subscription (or calling
/// [`unsubscribe`](Self::unsubscribe)) stops the task; when it was the key's
/// last subscriber, any in-flight result is discarded.
pub struct Subscription<V: Clone + Send + Sync + 'static> {
    target: Option<Target<V>>,
}

struct Target<V: Clone + Send + Sync + 'static> {
    cache: QueryCache<V>,
    key: QueryKey,
    stale_time: Duration,
    updates: watch::Receiver<u64>,
    ticker: JoinHandle<()>,
}

impl<V: Clone + Send + Sync + 'static> Subscription<V> {
    fn active(
        cache: QueryCache<V>,
        key: QueryKey,
        stale_time: Duration,
        updates: watch::Receiver<u64>,
        ticker: JoinHandle<()>,
    ) -> Self {
        Self {
            target: Some(Target {
                cache,
                key,
                stale_time,
                updates,
                ticker,
            }),
        }
    }

    fn inert() -> Self {
        Self { target: None }
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn key(&self) -> Option<&QueryKey> {
        self.target.as_ref().map(|t| &t.key)
    }

    pub fn state(&self) -> QueryState<V> {
        match &self.target {
            Some(t) => t.cache.state(&t.key, t.stale_time),
            None => QueryState::Idle,
        }
    }

    /// Wait until the entry changes. Returns `false` for an inert
    /// subscription or once the entry has been evicted.
    pub async fn changed(&mut self) -> bool {
        match &mut self.target {
            Some(t) => t.updates.changed().await.is_ok(),
            None => false,
        }
    }

    pub fn unsubscribe(self) {}
}

impl<V: Clone + Send + Sync + 'static> Drop for Subscription<V> {
    fn drop(&mut self) {
        if let Some(t) = self.target.take() {
            t.ticker.abort();
            t.cache.unsubscribe(&t.key);
            debug!(key = %t.key, "unsubscribed");
        }
    }
}
