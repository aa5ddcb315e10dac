//! Keyed query cache with staleness windows, polling and invalidation
//!
//! Values of any type are stored type-erased and downcast on read. Every fetch
//! runs on its own spawned task so that it settles into the cache even if the
//! caller or watcher that started it goes away.
//!
//! ## Conflict policy
//!
//! Each dispatched fetch takes a sequence number from a cache-wide counter. A
//! settled result is applied only if its sequence is newer than the last one
//! applied to the entry; otherwise it is discarded. When two polls of the same
//! key overlap, the later dispatch wins regardless of which one settles first.
//! `set_query_data` takes a sequence number too, and entries created after a
//! `remove` or `clear` start at the current counter, so an older in-flight
//! fetch can never overwrite an optimistic value or resurrect a removed entry.

use crate::error::{ApiError, QueryError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

type AnyValue = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<AnyValue, QueryError>>>;
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<AnyValue, QueryError>> + Send + Sync>;

/// Produces a fresh value for a query key
pub type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

/// Wraps an async closure into a [`Fetcher`]
pub fn fetcher<T, F, Fut>(f: F) -> Fetcher<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<T, ApiError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

fn erase<T: Send + Sync + 'static>(fetcher: Fetcher<T>) -> ErasedFetcher {
    Arc::new(move || {
        let fut = fetcher();
        async move {
            fut.await
                .map(|value| Arc::new(value) as AnyValue)
                .map_err(QueryError::from)
        }
        .boxed()
    })
}

/// Hierarchical cache key, e.g. `["coins", "1", "100"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// True if `prefix`'s segments are a leading run of this key's segments
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl<const N: usize> From<[&str; N]> for QueryKey {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Freshness and polling policy of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long fetched data is served without refetching
    pub stale_time: Duration,
    /// Polling period for watchers; `None` disables polling
    pub refetch_interval: Option<Duration>,
}

impl QueryOptions {
    /// Poll every `interval`, treating data as fresh for the same period
    pub fn polling(interval: Duration) -> Self {
        Self {
            stale_time: interval,
            refetch_interval: Some(interval),
        }
    }

    /// Never poll; data stays fresh for `stale_time`
    pub fn stale_for(stale_time: Duration) -> Self {
        Self {
            stale_time,
            refetch_interval: None,
        }
    }
}

/// Snapshot of a cached query as seen by a reader
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: Option<T>,
    /// Error of the last applied fetch; previous data is kept alongside
    pub error: Option<QueryError>,
    pub updated_at: Option<Instant>,
    pub is_fetching: bool,
}

impl<T> QueryState<T> {
    fn empty() -> Self {
        Self {
            data: None,
            error: None,
            updated_at: None,
            is_fetching: false,
        }
    }

    /// Nothing to show yet
    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.error.is_none()
    }
}

struct Entry {
    data: Option<AnyValue>,
    error: Option<QueryError>,
    updated_at: Option<Instant>,
    invalidated: bool,
    applied_seq: u64,
    in_flight: Option<(u64, SharedFetch)>,
    fetcher: Option<ErasedFetcher>,
    observers: usize,
    notify: watch::Sender<u64>,
}

impl Entry {
    fn new(floor: u64) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            data: None,
            error: None,
            updated_at: None,
            invalidated: false,
            applied_seq: floor,
            in_flight: None,
            fetcher: None,
            observers: 0,
            notify,
        }
    }

    fn fresh_data(&self, stale_time: Duration) -> Option<&AnyValue> {
        if self.invalidated {
            return None;
        }
        let updated_at = self.updated_at?;
        if updated_at.elapsed() >= stale_time {
            return None;
        }
        self.data.as_ref()
    }

    fn touch(&self) {
        self.notify.send_modify(|version| *version += 1);
    }
}

struct Inner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    seq: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn settle(&self, key: &QueryKey, seq: u64, result: &Result<AnyValue, QueryError>) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            tracing::debug!(key = %key, seq, "Dropping result for removed query");
            return;
        };

        if entry.in_flight.as_ref().is_some_and(|(s, _)| *s == seq) {
            entry.in_flight = None;
        }

        if seq <= entry.applied_seq {
            tracing::debug!(
                key = %key,
                seq,
                applied_seq = entry.applied_seq,
                "Discarding superseded query result"
            );
            entry.touch();
            return;
        }

        entry.applied_seq = seq;
        match result {
            Ok(value) => {
                entry.data = Some(value.clone());
                entry.error = None;
                entry.updated_at = Some(Instant::now());
                entry.invalidated = false;
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Query fetch failed");
                entry.error = Some(e.clone());
            }
        }
        entry.touch();
    }
}

/// Shared, cloneable query cache
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Returns fresh cached data, or fetches it
    ///
    /// Concurrent callers for the same key join the fetch already in flight.
    pub async fn fetch_query<T>(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: Fetcher<T>,
    ) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let fetch = {
            let mut entries = self.inner.lock();
            let floor = self.inner.current_seq();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(floor));

            if let Some(value) = entry.fresh_data(options.stale_time) {
                tracing::debug!(key = %key, "Query cache hit");
                return downcast(key, value);
            }

            let in_flight = entry.in_flight.as_ref().map(|(_, fetch)| fetch.clone());
            match in_flight {
                Some(fetch) => fetch,
                None => {
                    tracing::debug!(key = %key, "Query cache miss");
                    self.dispatch(entry, key, erase(fetcher))
                }
            }
        };

        let value = fetch.await?;
        downcast(key, &value)
    }

    /// Always dispatches a new fetch, superseding any in flight
    pub async fn refetch<T>(&self, key: &QueryKey, fetcher: Fetcher<T>) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let fetch = {
            let mut entries = self.inner.lock();
            let floor = self.inner.current_seq();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(floor));
            self.dispatch(entry, key, erase(fetcher))
        };

        let value = fetch.await?;
        downcast(key, &value)
    }

    /// Spawns a fetch and registers it as the entry's in-flight fetch
    fn dispatch(&self, entry: &mut Entry, key: &QueryKey, fetcher: ErasedFetcher) -> SharedFetch {
        let seq = self.inner.next_seq();
        entry.fetcher = Some(fetcher.clone());

        let inner = self.inner.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            // A panicking fetcher still settles so the entry can fetch again.
            let result = match AssertUnwindSafe(async { fetcher().await }).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(key = %task_key, "Query fetcher panicked");
                    Err(QueryError::Cancelled {
                        key: task_key.to_string(),
                    })
                }
            };
            inner.settle(&task_key, seq, &result);
            result
        });

        let cancelled_key = key.to_string();
        let fetch = async move {
            handle.await.unwrap_or_else(|_| {
                Err(QueryError::Cancelled {
                    key: cancelled_key,
                })
            })
        }
        .boxed()
        .shared();

        entry.in_flight = Some((seq, fetch.clone()));
        entry.touch();
        fetch
    }

    /// Dispatches with the entry's last fetcher, if it has one
    fn dispatch_stored(&self, key: &QueryKey) {
        let mut entries = self.inner.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if let Some(fetcher) = entry.fetcher.clone() {
            self.dispatch(entry, key, fetcher);
        }
    }

    /// Cached data for a key, regardless of staleness
    pub fn get_query_data<T>(&self, key: &QueryKey) -> Result<T, QueryError>
    where
        T: Clone + 'static,
    {
        let entries = self.inner.lock();
        let value = entries
            .get(key)
            .and_then(|entry| entry.data.as_ref())
            .ok_or_else(|| QueryError::NotCached {
                key: key.to_string(),
            })?;
        downcast(key, value)
    }

    /// Current state of a key as seen by a reader
    pub fn get_state<T>(&self, key: &QueryKey) -> QueryState<T>
    where
        T: Clone + 'static,
    {
        let entries = self.inner.lock();
        let Some(entry) = entries.get(key) else {
            return QueryState::empty();
        };

        let (data, type_error) = match &entry.data {
            Some(value) => match downcast::<T>(key, value) {
                Ok(data) => (Some(data), None),
                Err(e) => (None, Some(e)),
            },
            None => (None, None),
        };

        QueryState {
            data,
            error: type_error.or_else(|| entry.error.clone()),
            updated_at: entry.updated_at,
            is_fetching: entry.in_flight.is_some(),
        }
    }

    /// Writes data directly, e.g. for optimistic updates
    ///
    /// Fetches already in flight for the key are superseded.
    pub fn set_query_data<T>(&self, key: &QueryKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        let mut entries = self.inner.lock();
        let floor = self.inner.current_seq();
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(floor));

        entry.applied_seq = self.inner.next_seq();
        entry.data = Some(Arc::new(value) as AnyValue);
        entry.error = None;
        entry.updated_at = Some(Instant::now());
        entry.invalidated = false;
        entry.touch();
    }

    /// Marks every entry under `prefix` stale and refetches the watched ones
    ///
    /// Returns the number of entries invalidated. Refetches only happen inside a
    /// tokio runtime.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let (count, watched) = {
            let mut entries = self.inner.lock();
            let mut count = 0;
            let mut watched = Vec::new();
            for (key, entry) in entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
                count += 1;
                entry.invalidated = true;
                entry.touch();
                if entry.observers > 0 {
                    watched.push(key.clone());
                }
            }
            (count, watched)
        };
        tracing::debug!(prefix = %prefix, count, watched = watched.len(), "Invalidated queries");

        if tokio::runtime::Handle::try_current().is_ok() {
            for key in &watched {
                self.dispatch_stored(key);
            }
        }

        count
    }

    /// Removes every entry under `prefix`; late results for them are dropped
    pub fn remove(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    /// Drops everything
    pub fn clear(&self) {
        let mut entries = self.inner.lock();
        tracing::debug!(count = entries.len(), "Clearing query cache");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Keys currently held, in no particular order
    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner.lock().keys().cloned().collect()
    }

    /// Starts observing a key: fetches it if stale, then polls it at
    /// `options.refetch_interval` until the watcher is dropped
    pub fn watch<T>(&self, key: QueryKey, options: QueryOptions, fetcher: Fetcher<T>) -> QueryWatcher<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let initial = self.get_state::<T>(&key);
        let (state_tx, state_rx) = watch::channel(initial);
        let erased = erase(fetcher);
        let changes = self.observe(&key, &erased);

        let cache = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            cache
                .run_watcher(task_key, options, erased, changes, state_tx)
                .await;
        });

        QueryWatcher {
            key,
            cache: self.clone(),
            state: state_rx,
            task,
        }
    }

    /// Registers an observer on the key and returns its change feed
    fn observe(&self, key: &QueryKey, fetcher: &ErasedFetcher) -> watch::Receiver<u64> {
        let mut entries = self.inner.lock();
        let floor = self.inner.current_seq();
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(floor));
        entry.observers += 1;
        if entry.fetcher.is_none() {
            entry.fetcher = Some(fetcher.clone());
        }
        entry.notify.subscribe()
    }

    fn unobserve(&self, key: &QueryKey) {
        let mut entries = self.inner.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.observers = entry.observers.saturating_sub(1);
        }
    }

    async fn run_watcher<T>(
        &self,
        key: QueryKey,
        options: QueryOptions,
        fetcher: ErasedFetcher,
        mut changes: watch::Receiver<u64>,
        state_tx: watch::Sender<QueryState<T>>,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        self.ensure_fresh(&key, options.stale_time, &fetcher);
        state_tx.send_replace(self.get_state::<T>(&key));

        let mut ticker = options.refetch_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    tracing::debug!(key = %key, "Polling query");
                    self.poll(&key, &fetcher);
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        // Entry was removed (e.g. cache cleared on sign-out).
                        changes = self.observe(&key, &fetcher);
                        self.ensure_fresh(&key, options.stale_time, &fetcher);
                    }
                    if state_tx.send(self.get_state::<T>(&key)).is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Dispatches unless the entry is fresh or already fetching
    fn ensure_fresh(&self, key: &QueryKey, stale_time: Duration, fetcher: &ErasedFetcher) {
        let mut entries = self.inner.lock();
        let floor = self.inner.current_seq();
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(floor));
        if entry.fresh_data(stale_time).is_none() && entry.in_flight.is_none() {
            self.dispatch(entry, key, fetcher.clone());
        }
    }

    /// Polls always dispatch; overlapping polls resolve by the conflict policy
    fn poll(&self, key: &QueryKey, fetcher: &ErasedFetcher) {
        let mut entries = self.inner.lock();
        let floor = self.inner.current_seq();
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(floor));
        self.dispatch(entry, key, fetcher.clone());
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn downcast<T: Clone + 'static>(key: &QueryKey, value: &AnyValue) -> Result<T, QueryError> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| QueryError::TypeMismatch {
            key: key.to_string(),
        })
}

/// Live view of a polled query
///
/// Dropping the watcher stops scheduling polls. Fetches already in flight
/// still settle into the cache.
pub struct QueryWatcher<T> {
    key: QueryKey,
    cache: QueryCache,
    state: watch::Receiver<QueryState<T>>,
    task: JoinHandle<()>,
}

impl<T: Clone> QueryWatcher<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Latest published state
    pub fn state(&self) -> QueryState<T> {
        self.state.borrow().clone()
    }

    /// Waits for the next state change
    pub async fn changed(&mut self) -> Option<QueryState<T>> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Waits until the state satisfies `predicate`
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<QueryState<T>>
    where
        F: FnMut(&QueryState<T>) -> bool,
    {
        self.state
            .wait_for(|state| predicate(state))
            .await
            .ok()
            .map(|state| state.clone())
    }
}

impl<T> Drop for QueryWatcher<T> {
    fn drop(&mut self) {
        self.task.abort();
        self.cache.unobserve(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_fetcher(calls: Arc<AtomicUsize>) -> Fetcher<u64> {
        fetcher(move || {
            let calls = calls.clone();
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst) as u64 + 1) }
        })
    }

    #[test]
    fn test_key_prefix_matching() {
        let key = QueryKey::from(["coins", "1", "100"]);
        assert!(key.starts_with(&QueryKey::from(["coins"])));
        assert!(!key.starts_with(&QueryKey::from(["coin"])));
        assert_eq!(key.to_string(), "coins/1/100");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_data_is_served_from_cache() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::from(["global-stats"]);
        let options = QueryOptions::stale_for(Duration::from_secs(60));

        let first = cache
            .fetch_query(&key, &options, counting_fetcher(calls.clone()))
            .await
            .unwrap();
        let second = cache
            .fetch_query(&key, &options, counting_fetcher(calls.clone()))
            .await
            .unwrap();

        assert_eq!((first, second), (1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let third = cache
            .fetch_query(&key, &options, counting_fetcher(calls.clone()))
            .await
            .unwrap();
        assert_eq!(third, 2);
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_fetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::from(["coins"]);
        let options = QueryOptions::stale_for(Duration::from_secs(30));

        let slow = {
            let calls = calls.clone();
            fetcher(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(vec!["bitcoin".to_string()])
                }
            })
        };

        let (a, b) = tokio::join!(
            cache.fetch_query(&key, &options, slow.clone()),
            cache.fetch_query(&key, &options, slow.clone()),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Second poll resolves before the first: the later dispatch wins.
    #[tokio::test]
    async fn test_out_of_order_polls_keep_latest_dispatch() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["market-hours"]);
        let dispatched = Arc::new(AtomicUsize::new(0));

        let racing = {
            let dispatched = dispatched.clone();
            fetcher(move || {
                let n = dispatched.fetch_add(1, Ordering::SeqCst);
                async move {
                    // First dispatch is slow, second is fast.
                    let delay = if n == 0 { 50 } else { 5 };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(format!("poll-{}", n + 1))
                }
            })
        };

        let (first, second) = tokio::join!(
            cache.refetch(&key, racing.clone()),
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                cache.refetch(&key, racing.clone()).await
            }
        );

        // Each caller still gets its own response...
        assert_eq!(first.unwrap(), "poll-1");
        assert_eq!(second.unwrap(), "poll-2");
        // ...but the slower, older poll did not overwrite the newer one.
        assert_eq!(cache.get_query_data::<String>(&key).unwrap(), "poll-2");
    }

    #[tokio::test]
    async fn test_error_keeps_previous_data() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["fear-greed"]);

        cache
            .refetch(&key, fetcher(|| async { Ok(42u8) }))
            .await
            .unwrap();
        let err = cache
            .refetch::<u8>(
                &key,
                fetcher(|| async { Err(ApiError::InvalidResponse("boom".into())) }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Fetch(_)));
        let state = cache.get_state::<u8>(&key);
        assert_eq!(state.data, Some(42));
        assert!(state.error.is_some());
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_type_mismatch_and_missing() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["search", "btc"]);

        assert!(matches!(
            cache.get_query_data::<String>(&key),
            Err(QueryError::NotCached { .. })
        ));

        cache.set_query_data(&key, 7u32);
        assert!(matches!(
            cache.get_query_data::<String>(&key),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert_eq!(cache.get_query_data::<u32>(&key).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_optimistic_write_beats_in_flight_fetch() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["watchlist", "u1"]);

        let slow = fetcher(|| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(vec!["bitcoin".to_string()])
        });

        let pending = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.refetch(&key, slow).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set_query_data(&key, vec!["bitcoin".to_string(), "ethereum".to_string()]);

        pending.await.unwrap().unwrap();
        assert_eq!(
            cache.get_query_data::<Vec<String>>(&key).unwrap(),
            vec!["bitcoin".to_string(), "ethereum".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::from(["admin", "hidden-coins"]);
        let options = QueryOptions::stale_for(Duration::from_secs(300));

        cache
            .fetch_query(&key, &options, counting_fetcher(calls.clone()))
            .await
            .unwrap();
        assert_eq!(cache.invalidate(&QueryKey::from(["admin"])), 1);

        let value = cache
            .fetch_query(&key, &options, counting_fetcher(calls.clone()))
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_removed_entry_is_not_resurrected() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["coins", "1"]);

        let slow = fetcher(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(1u8)
        });
        let pending = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.refetch(&key, slow).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.clear();

        pending.await.unwrap().unwrap();
        assert!(cache.get_query_data::<u8>(&key).is_err());
    }

    #[tokio::test]
    async fn test_panicking_fetch_reports_cancelled_and_recovers() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["coins", "1"]);
        let options = QueryOptions::stale_for(Duration::from_secs(60));

        let crashing: Fetcher<u64> = fetcher(|| async {
            if true {
                panic!("fetcher crashed");
            }
            Ok(0)
        });
        let err = cache.fetch_query(&key, &options, crashing).await.unwrap_err();
        assert_eq!(err, QueryError::Cancelled { key: key.to_string() });
        assert!(!cache.get_state::<u64>(&key).is_fetching);

        let calls = Arc::new(AtomicUsize::new(0));
        let value = cache
            .fetch_query(&key, &options, counting_fetcher(calls.clone()))
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_polls_until_dropped() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::from(["market-hours"]);

        let mut watcher = cache.watch(
            key.clone(),
            QueryOptions::polling(Duration::from_secs(1)),
            counting_fetcher(calls.clone()),
        );

        let state = watcher.wait_for(|s| s.data == Some(1)).await.unwrap();
        assert_eq!(state.data, Some(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let state = watcher.wait_for(|s| s.data == Some(2)).await.unwrap();
        assert_eq!(state.data, Some(2));

        drop(watcher);
        let before = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_invalidate_refetches_watched_entries() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::from(["admin", "users"]);

        let mut watcher = cache.watch(
            key.clone(),
            QueryOptions::stale_for(Duration::from_secs(300)),
            counting_fetcher(calls.clone()),
        );
        watcher.wait_for(|s| s.data == Some(1)).await.unwrap();

        cache.invalidate(&QueryKey::from(["admin"]));
        let state = watcher.wait_for(|s| s.data == Some(2)).await.unwrap();
        assert_eq!(state.data, Some(2));
    }
}
