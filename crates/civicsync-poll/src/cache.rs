//! Keyed query cache with in-flight de-duplication.
//!
//! Each entry holds the last good value, the last error, when the value was
//! fetched, and the request currently in flight. Every request gets an id
//! from a monotonically increasing counter; a resolved request is written back
//! only while it is still the entry's latest request, so a superseded or
//! cancelled request can never overwrite newer state. Entries are replaced
//! field-wise under one short lock, never patched across an await.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use civicsync_core::Pipeline;
use civicsync_sync::FetchError;

/// Errors are shared between every caller of the same request.
pub type QueryError = Arc<FetchError>;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, QueryError>>>;

/// Cache key: an operation name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    operation: &'static str,
    args: Vec<String>,
}

impl QueryKey {
    pub fn new(operation: &'static str, args: Vec<String>) -> Self {
        Self { operation, args }
    }

    /// Key of a snapshot over `pipelines`; order does not matter.
    pub fn freshness(pipelines: &[Pipeline]) -> Self {
        let mut pipelines = pipelines.to_vec();
        pipelines.sort();
        pipelines.dedup();
        Self::new(
            "freshness",
            pipelines.iter().map(|p| p.as_str().to_string()).collect(),
        )
    }

    pub fn completeness(entity_id: &str) -> Self {
        Self::new("completeness", vec![entity_id.to_string()])
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.args.join(","))
    }
}

/// What a consumer sees for one key.
#[derive(Debug, Clone)]
pub enum QueryState<V> {
    /// Nothing requested: the query is disabled or was never started.
    Idle,
    /// First fetch in flight, nothing cached yet.
    Loading,
    /// A value is cached. `error` is set when the latest refresh failed; the
    /// value is the last known good one.
    Success {
        value: V,
        fetched_at: Instant,
        is_stale: bool,
        is_fetching: bool,
        error: Option<QueryError>,
    },
    /// The fetch failed and there is no value to fall back on.
    Error(QueryError),
}

impl<V> QueryState<V> {
    pub fn value(&self) -> Option<&V> {
        match self {
            QueryState::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            QueryState::Success { error, .. } => error.as_ref(),
            QueryState::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, QueryState::Idle)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }
}

struct InFlight<V> {
    request_id: u64,
    future: SharedFetch<V>,
    abort: AbortHandle,
}

struct Entry<V> {
    value: Option<V>,
    error: Option<QueryError>,
    fetched_at: Option<Instant>,
    in_flight: Option<InFlight<V>>,
    latest_request: u64,
    subscribers: usize,
    version: watch::Sender<u64>,
}

impl<V: Clone> Entry<V> {
    fn new() -> Self {
        Self {
            value: None,
            error: None,
            fetched_at: None,
            in_flight: None,
            latest_request: 0,
            subscribers: 0,
            version: watch::Sender::new(0),
        }
    }

    fn is_stale(&self, stale_time: Duration) -> bool {
        self.fetched_at
            .is_none_or(|at| at.elapsed() >= stale_time)
    }

    fn state(&self, stale_time: Duration) -> QueryState<V> {
        let is_fetching = self.in_flight.is_some();
        match (&self.value, self.fetched_at) {
            (Some(value), Some(fetched_at)) => QueryState::Success {
                value: value.clone(),
                fetched_at,
                is_stale: self.is_stale(stale_time),
                is_fetching,
                error: self.error.clone(),
            },
            _ => match &self.error {
                Some(err) => QueryState::Error(err.clone()),
                None if is_fetching => QueryState::Loading,
                None => QueryState::Idle,
            },
        }
    }

    fn settled(&self) -> Option<Result<V, QueryError>> {
        match (&self.error, &self.value) {
            (Some(err), _) => Some(Err(err.clone())),
            (None, Some(value)) => Some(Ok(value.clone())),
            (None, None) => None,
        }
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

enum Next<V> {
    Done,
    Follow(u64, SharedFetch<V>),
    Settled(Result<V, QueryError>),
}

struct Inner<V> {
    entries: Mutex<HashMap<QueryKey, Entry<V>>>,
    next_request: AtomicU64,
}

/// Shared, cloneable handle to a keyed cache of `V`.
///
/// Must be used from within a Tokio runtime: each request is driven by its
/// own spawned task so that it completes even if every caller stops waiting.
pub struct QueryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> QueryCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                next_request: AtomicU64::new(0),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry<V>>> {
        lock(&self.inner)
    }

    fn next_request_id(&self) -> u64 {
        self.inner.next_request.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current state of `key` without triggering any fetch.
    pub fn state(&self, key: &QueryKey, stale_time: Duration) -> QueryState<V> {
        self.entries()
            .get(key)
            .map_or(QueryState::Idle, |entry| entry.state(stale_time))
    }

    /// Cached value of `key`, fresh or not.
    pub fn peek(&self, key: &QueryKey) -> Option<V> {
        self.entries().get(key).and_then(|entry| entry.value.clone())
    }

    /// Id of the request currently in flight for `key`.
    pub fn in_flight(&self, key: &QueryKey) -> Option<u64> {
        self.entries()
            .get(key)
            .and_then(|entry| entry.in_flight.as_ref())
            .map(|flight| flight.request_id)
    }

    /// Stale-while-revalidate read.
    ///
    /// A cached value is returned immediately; if it is older than
    /// `stale_time` a background refresh is started first. Only when nothing
    /// is cached does the caller wait, joining the in-flight request if there
    /// is one.
    pub async fn get<F, Fut>(
        &self,
        key: &QueryKey,
        stale_time: Duration,
        fetcher: F,
    ) -> Result<V, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        {
            let mut entries = self.entries();
            let cached = entries.get(key).and_then(|entry| {
                let value = entry.value.clone()?;
                let revalidate = entry.is_stale(stale_time) && entry.in_flight.is_none();
                Some((value, revalidate))
            });
            if let Some((value, revalidate)) = cached {
                if revalidate {
                    debug!(key = %key, "serving stale value, revalidating in background");
                    self.start_locked(&mut entries, key, fetcher);
                }
                return Ok(value);
            }
        }
        self.fetch(key, fetcher).await
    }

    /// [`get`](Self::get), reported as a settled [`QueryState`].
    pub async fn load<F, Fut>(&self, key: &QueryKey, stale_time: Duration, fetcher: F) -> QueryState<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let result = self.get(key, stale_time, fetcher).await;
        match (self.state(key, stale_time), result) {
            (state @ (QueryState::Success { .. } | QueryState::Error(_)), _) => state,
            // The entry was cancelled or evicted while we waited.
            (_, Ok(value)) => QueryState::Success {
                value,
                fetched_at: Instant::now(),
                is_stale: false,
                is_fetching: false,
                error: None,
            },
            (_, Err(err)) => QueryState::Error(err),
        }
    }

    /// Wait for a value, joining the in-flight request for `key` or starting one.
    pub async fn fetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<V, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let (request_id, future) = {
            let mut entries = self.entries();
            let joined = entries
                .get(key)
                .and_then(|entry| entry.in_flight.as_ref())
                .map(|flight| (flight.request_id, flight.future.clone()));
            match joined {
                Some((request_id, future)) => {
                    debug!(key = %key, request_id, "joining in-flight request");
                    (request_id, future)
                }
                None => self.start_locked(&mut entries, key, fetcher),
            }
        };
        self.follow(key, request_id, future).await
    }

    /// Start a new request for `key` even if one is in flight, superseding it.
    pub async fn refetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<V, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let (request_id, future) = self.start(key, fetcher);
        self.follow(key, request_id, future).await
    }

    /// Start a request in the background unless one is already in flight.
    /// Returns the id of the request serving `key`.
    pub fn prefetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> u64
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let mut entries = self.entries();
        if let Some(flight) = entries.get(key).and_then(|entry| entry.in_flight.as_ref()) {
            return flight.request_id;
        }
        self.start_locked(&mut entries, key, fetcher).0
    }

    /// Like [`prefetch`](Self::prefetch), but only when nothing fresh is cached.
    pub fn ensure_fresh<F, Fut>(&self, key: &QueryKey, stale_time: Duration, fetcher: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let mut entries = self.entries();
        let needed = entries
            .get(key)
            .is_none_or(|entry| entry.in_flight.is_none() && entry.is_stale(stale_time));
        if needed {
            self.start_locked(&mut entries, key, fetcher);
        }
        needed
    }

    fn start<F, Fut>(&self, key: &QueryKey, fetcher: F) -> (u64, SharedFetch<V>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let mut entries = self.entries();
        self.start_locked(&mut entries, key, fetcher)
    }

    fn start_locked<F, Fut>(
        &self,
        entries: &mut HashMap<QueryKey, Entry<V>>,
        key: &QueryKey,
        fetcher: F,
    ) -> (u64, SharedFetch<V>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let request_id = self.next_request_id();
        let call = fetcher();
        let cache = Arc::downgrade(&self.inner);
        let settle_key = key.clone();
        let future = async move {
            let result = call.await.map_err(Arc::new);
            settle(&cache, &settle_key, request_id, &result);
            result
        }
        .boxed()
        .shared();
        let task = tokio::spawn(future.clone());

        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.latest_request = request_id;
        let previous = entry.in_flight.replace(InFlight {
            request_id,
            future: future.clone(),
            abort: task.abort_handle(),
        });
        match previous {
            Some(old) => debug!(
                key = %key,
                request_id,
                superseded = old.request_id,
                "started request, superseding in-flight one"
            ),
            None => debug!(key = %key, request_id, "started request"),
        }
        entry.bump_version();
        (request_id, future)
    }

    /// Await `future`; if a newer request for `key` started meanwhile, hand
    /// back that one's outcome instead.
    async fn follow(
        &self,
        key: &QueryKey,
        mut request_id: u64,
        mut future: SharedFetch<V>,
    ) -> Result<V, QueryError> {
        loop {
            let result = future.await;
            match self.next_after(key, request_id) {
                Next::Done => return result,
                Next::Follow(id, next) => {
                    request_id = id;
                    future = next;
                }
                Next::Settled(settled) => return settled,
            }
        }
    }

    fn next_after(&self, key: &QueryKey, request_id: u64) -> Next<V> {
        let entries = self.entries();
        let Some(entry) = entries.get(key) else {
            return Next::Done;
        };
        if entry.latest_request <= request_id {
            return Next::Done;
        }
        match &entry.in_flight {
            Some(flight) => Next::Follow(flight.request_id, flight.future.clone()),
            None => entry.settled().map_or(Next::Done, Next::Settled),
        }
    }

    /// Register a consumer of `key`; the receiver ticks whenever the entry changes.
    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<u64> {
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.subscribers += 1;
        entry.version.subscribe()
    }

    /// Drop a consumer of `key`. When the last one leaves, the in-flight
    /// request is aborted and its result will be discarded.
    pub fn unsubscribe(&self, key: &QueryKey) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers > 0 {
            return;
        }
        if let Some(flight) = entry.in_flight.take() {
            flight.abort.abort();
            entry.latest_request = self.next_request_id();
            debug!(
                key = %key,
                request_id = flight.request_id,
                "last consumer gone, in-flight request discarded"
            );
            entry.bump_version();
        }
    }

    pub fn subscribers(&self, key: &QueryKey) -> usize {
        self.entries().get(key).map_or(0, |entry| entry.subscribers)
    }

    /// Remove `key` entirely, discarding any in-flight result.
    pub fn evict(&self, key: &QueryKey) -> Option<V> {
        let entry = self.entries().remove(key)?;
        if let Some(flight) = &entry.in_flight {
            flight.abort.abort();
        }
        entry.value
    }
}

fn lock<V>(inner: &Inner<V>) -> MutexGuard<'_, HashMap<QueryKey, Entry<V>>> {
    inner
        .entries
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Write a resolved request back, unless it is no longer the latest for its key.
fn settle<V: Clone>(
    cache: &Weak<Inner<V>>,
    key: &QueryKey,
    request_id: u64,
    result: &Result<V, QueryError>,
) {
    let Some(inner) = cache.upgrade() else {
        return;
    };
    let mut entries = lock(&inner);
    let Some(entry) = entries.get_mut(key) else {
        debug!(key = %key, request_id, "entry evicted, result discarded");
        return;
    };
    if entry.latest_request != request_id {
        debug!(
            key = %key,
            request_id,
            latest = entry.latest_request,
            "superseded result discarded"
        );
        return;
    }
    entry.in_flight = None;
    match result {
        Ok(value) => {
            entry.value = Some(value.clone());
            entry.error = None;
            entry.fetched_at = Some(Instant::now());
        }
        Err(err) => {
            warn!(key = %key, request_id, error = %err, "refresh failed, keeping last good value");
            entry.error = Some(err.clone());
        }
    }
    entry.bump_version();
}

#[cfg(test)]
mod tests {
    use super::*;
    use civicsync_store::StoreError;
    use tokio::sync::oneshot;

    const STALE: Duration = Duration::from_secs(30);

    fn failure(reason: &str) -> FetchError {
        FetchError::Completeness {
            entity_id: "K000001".into(),
            source: StoreError::Unavailable(reason.into()),
        }
    }

    fn key() -> QueryKey {
        QueryKey::completeness("K000001")
    }

    /// A fetcher resolved by hand through the returned sender.
    fn gated() -> (
        oneshot::Sender<Result<String, FetchError>>,
        impl FnOnce() -> BoxFuture<'static, Result<String, FetchError>>,
    ) {
        let (tx, rx) = oneshot::channel();
        let fetcher = move || {
            async move { rx.await.unwrap_or_else(|_| Err(failure("dropped"))) }.boxed()
        };
        (tx, fetcher)
    }

    fn unreachable() -> impl FnOnce() -> BoxFuture<'static, Result<String, FetchError>> {
        || async { panic!("fetcher must not run") }.boxed()
    }

    fn ready(value: &str) -> impl FnOnce() -> BoxFuture<'static, Result<String, FetchError>> {
        let value = value.to_string();
        move || async move { Ok(value) }.boxed()
    }

    #[test]
    fn freshness_key_ignores_pipeline_order() {
        assert_eq!(
            QueryKey::freshness(&[Pipeline::Votes, Pipeline::Bills]),
            QueryKey::freshness(&[Pipeline::Bills, Pipeline::Votes, Pipeline::Bills])
        );
        assert_eq!(
            QueryKey::freshness(&[Pipeline::Votes, Pipeline::Bills]).to_string(),
            "freshness(bills,votes)"
        );
    }

    #[tokio::test]
    async fn unknown_key_is_idle() {
        let cache: QueryCache<String> = QueryCache::new();
        assert!(cache.state(&key(), STALE).is_idle());
        assert_eq!(cache.peek(&key()), None);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_request() {
        let cache: QueryCache<String> = QueryCache::new();
        let key = key();
        let (tx, fetcher) = gated();
        let first = cache.fetch(&key, fetcher);
        let second = cache.fetch(&key, unreachable());
        let resolve = async {
            tokio::task::yield_now().await;
            tx.send(Ok("v1".into())).unwrap();
        };
        let (a, b, ()) = tokio::join!(first, second, resolve);
        assert_eq!(a.unwrap(), "v1");
        assert_eq!(b.unwrap(), "v1");
    }

    #[tokio::test]
    async fn concurrent_fetches_share_the_same_error() {
        let cache: QueryCache<String> = QueryCache::new();
        let key = key();
        let (tx, fetcher) = gated();
        let first = cache.fetch(&key, fetcher);
        let second = cache.fetch(&key, ready("unused"));
        let resolve = async {
            tokio::task::yield_now().await;
            tx.send(Err(failure("boom"))).unwrap();
        };
        let (a, b, ()) = tokio::join!(first, second, resolve);
        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(cache.state(&key, STALE), QueryState::Error(_)));
    }

    #[tokio::test]
    async fn loading_until_first_result() {
        let cache: QueryCache<String> = QueryCache::new();
        let (tx, fetcher) = gated();
        let request_id = cache.prefetch(&key(), fetcher);
        assert_eq!(cache.in_flight(&key()), Some(request_id));
        assert!(cache.state(&key(), STALE).is_loading());

        tx.send(Ok("v1".into())).unwrap();
        let value = cache.fetch(&key(), ready("unused")).await.unwrap();
        assert_eq!(value, "v1");
        assert_eq!(cache.in_flight(&key()), None);
    }

    #[tokio::test]
    async fn newer_request_wins_when_it_resolves_first() {
        let cache: QueryCache<String> = QueryCache::new();
        let (old_tx, old) = gated();
        let (new_tx, new) = gated();
        let key = key();
        cache.prefetch(&key, old);
        let newer = cache.refetch(&key, new);
        let resolve = async {
            tokio::task::yield_now().await;
            new_tx.send(Ok("new".into())).unwrap();
            tokio::task::yield_now().await;
            old_tx.send(Ok("old".into())).unwrap();
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
        };
        let (result, ()) = tokio::join!(newer, resolve);
        assert_eq!(result.unwrap(), "new");
        assert_eq!(cache.peek(&key).as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn superseded_result_is_discarded_when_it_resolves_first() {
        let cache: QueryCache<String> = QueryCache::new();
        let (old_tx, old) = gated();
        let (new_tx, new) = gated();

        let key = key();
        let older = cache.fetch(&key, old);
        let newer = async {
            tokio::task::yield_now().await;
            cache.refetch(&key, new).await
        };
        let resolve = async {
            for _ in 0..2 {
                tokio::task::yield_now().await;
            }
            old_tx.send(Ok("old".into())).unwrap();
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
            assert_eq!(cache.peek(&key), None, "stale result must not land");
            new_tx.send(Ok("new".into())).unwrap();
        };
        let (older, newer, ()) = tokio::join!(older, newer, resolve);
        // The caller of the superseded request is handed the newer outcome.
        assert_eq!(older.unwrap(), "new");
        assert_eq!(newer.unwrap(), "new");
        assert_eq!(cache.peek(&key).as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_value_is_served_while_revalidating() {
        let cache: QueryCache<String> = QueryCache::new();
        cache.fetch(&key(), ready("v1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let (tx, fetcher) = gated();
        let value = cache.get(&key(), STALE, fetcher).await.unwrap();
        assert_eq!(value, "v1");
        match cache.state(&key(), STALE) {
            QueryState::Success {
                value,
                is_stale,
                is_fetching,
                ..
            } => {
                assert_eq!(value, "v1");
                assert!(is_stale);
                assert!(is_fetching);
            }
            other => panic!("expected success, got {other:?}"),
        }

        tx.send(Ok("v2".into())).unwrap();
        let value = cache.fetch(&key(), ready("unused")).await.unwrap();
        assert_eq!(value, "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_value_is_not_refetched() {
        let cache: QueryCache<String> = QueryCache::new();
        cache.fetch(&key(), ready("v1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let value = cache
            .get(&key(), STALE, unreachable())
            .await
            .unwrap();
        assert_eq!(value, "v1");
        assert_eq!(cache.in_flight(&key()), None);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_good_value() {
        let cache: QueryCache<String> = QueryCache::new();
        cache.fetch(&key(), ready("v1")).await.unwrap();
        let err = cache
            .refetch(&key(), || async { Err::<String, _>(failure("503")) })
            .await
            .unwrap_err();
        assert!(matches!(err.store_error(), StoreError::Unavailable(_)));

        let state = cache.state(&key(), STALE);
        assert_eq!(state.value().map(String::as_str), Some("v1"));
        assert!(state.error().is_some());

        cache.refetch(&key(), ready("v2")).await.unwrap();
        assert!(cache.state(&key(), STALE).error().is_none());
    }

    #[tokio::test]
    async fn last_unsubscribe_discards_in_flight_result() {
        let cache: QueryCache<String> = QueryCache::new();
        let _updates = cache.subscribe(&key());
        let (tx, fetcher) = gated();
        cache.prefetch(&key(), fetcher);
        cache.unsubscribe(&key());
        assert_eq!(cache.in_flight(&key()), None);

        let _ = tx.send(Ok("late".into()));
        tokio::task::yield_now().await;
        assert_eq!(cache.peek(&key()), None);
        assert!(cache.state(&key(), STALE).is_idle());
    }

    #[tokio::test]
    async fn remaining_subscriber_keeps_request_alive() {
        let cache: QueryCache<String> = QueryCache::new();
        let _a = cache.subscribe(&key());
        let _b = cache.subscribe(&key());
        let (tx, fetcher) = gated();
        cache.prefetch(&key(), fetcher);
        cache.unsubscribe(&key());
        assert_eq!(cache.subscribers(&key()), 1);
        assert!(cache.in_flight(&key()).is_some());

        tx.send(Ok("v1".into())).unwrap();
        assert_eq!(cache.fetch(&key(), ready("unused")).await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn subscribers_are_notified_on_settle() {
        let cache: QueryCache<String> = QueryCache::new();
        let mut updates = cache.subscribe(&key());
        updates.borrow_and_update();
        cache.fetch(&key(), ready("v1")).await.unwrap();
        assert!(updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn evict_drops_entry() {
        let cache: QueryCache<String> = QueryCache::new();
        cache.fetch(&key(), ready("v1")).await.unwrap();
        assert_eq!(cache.evict(&key()).as_deref(), Some("v1"));
        assert!(cache.state(&key(), STALE).is_idle());
    }
}
