use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// Asynchronous source of values for a parameter set.
#[async_trait]
pub trait Fetcher<P, T>: Send + Sync {
    async fn fetch(&self, params: &P) -> Result<T>;
}

/// Results keyed by serialized parameters, bounded by insertion order.
///
/// Re-inserting a present key replaces the value but keeps its place in the
/// eviction order.
#[derive(Debug, Clone)]
pub struct QueryCache<T> {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, T>,
}

impl<T> QueryCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity + 1),
            entries: HashMap::with_capacity(capacity + 1),
        }
    }

    pub fn key_for<P: Serialize>(params: &P) -> Result<String> {
        serde_json::to_string(params).context("Failed to serialize query parameters")
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Stores `value`, returning the keys evicted to stay within capacity.
    pub fn insert(&mut self, key: String, value: T) -> Vec<String> {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        let mut evicted = Vec::new();
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Keys from oldest to newest.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub delay: Duration,
    pub capacity: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DEBOUNCE,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStatus {
    /// A parameter change is waiting for the debounce timer.
    pub is_pending: bool,
    /// The latest request is being fetched.
    pub is_loading: bool,
}

#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
    pub value: T,
    pub status: QueryStatus,
    /// Failure of the latest request, cleared by the next successful one.
    pub last_error: Option<Arc<anyhow::Error>>,
    /// Generation of the request whose result is in `value`.
    pub generation: u64,
}

struct State<P, T> {
    params: P,
    cache: QueryCache<T>,
    /// Generation that stored each cached key.
    stored: HashMap<String, u64>,
    /// Bumped by `invalidate`; results fetched under an older epoch are not cached.
    epoch: u64,
    issued: u64,
    timer_seq: u64,
    timer: Option<JoinHandle<()>>,
    fetches: u64,
}

struct Shared<P, T> {
    state: Mutex<State<P, T>>,
    fetcher: Arc<dyn Fetcher<P, T>>,
    delay: Duration,
    snapshot: watch::Sender<QuerySnapshot<T>>,
}

/// Debounced, memoizing wrapper around a [`Fetcher`].
///
/// Parameter changes restart a quiet-period timer; only the parameters in
/// place when it elapses are requested. Every request gets a generation
/// number and only the newest generation may commit its result, so a slow
/// response can never overwrite a newer one. In-flight fetches are never
/// cancelled.
pub struct DebouncedQuery<P, T> {
    shared: Arc<Shared<P, T>>,
}

impl<P, T> Clone for DebouncedQuery<P, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P, T> DebouncedQuery<P, T>
where
    P: Clone + PartialEq + Serialize + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        initial: T,
        fetcher: Arc<dyn Fetcher<P, T>>,
        params: P,
        options: QueryOptions,
    ) -> Self {
        let (snapshot, _) = watch::channel(QuerySnapshot {
            value: initial,
            status: QueryStatus::default(),
            last_error: None,
            generation: 0,
        });
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    params,
                    cache: QueryCache::new(options.capacity),
                    stored: HashMap::new(),
                    epoch: 0,
                    issued: 0,
                    timer_seq: 0,
                    timer: None,
                    fetches: 0,
                }),
                fetcher,
                delay: options.delay,
                snapshot,
            }),
        }
    }

    /// Requests the current parameters right away, without debouncing.
    pub fn activate(&self) {
        let params = self.shared.state.lock().params.clone();
        Shared::issue(&self.shared, params, false);
    }

    /// Records new parameters and (re)starts the debounce timer.
    ///
    /// Setting the parameters that were last requested is a no-op.
    pub fn set_params(&self, params: P) {
        let mut state = self.shared.state.lock();
        if state.params == params {
            return;
        }
        state.params = params;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.timer_seq += 1;
        let seq = state.timer_seq;

        self.shared.snapshot.send_modify(|s| s.status.is_pending = true);

        let shared = Arc::clone(&self.shared);
        let delay = self.shared.delay;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Shared::fire_timer(&shared, seq);
        }));
    }

    /// Drops every cached result; the next request goes to the fetcher.
    pub fn invalidate(&self) {
        let mut state = self.shared.state.lock();
        debug!(entries = state.cache.len(), "Invalidating query cache");
        state.cache.clear();
        state.stored.clear();
        state.epoch += 1;
    }

    /// Invalidates the cache and re-requests the current parameters now.
    pub fn refresh(&self) {
        self.invalidate();
        self.activate();
    }

    pub fn value(&self) -> T {
        self.shared.snapshot.borrow().value.clone()
    }

    pub fn status(&self) -> QueryStatus {
        self.shared.snapshot.borrow().status
    }

    pub fn last_error(&self) -> Option<Arc<anyhow::Error>> {
        self.shared.snapshot.borrow().last_error.clone()
    }

    pub fn snapshot(&self) -> QuerySnapshot<T> {
        self.shared.snapshot.borrow().clone()
    }

    /// Notified on every value or status change.
    pub fn subscribe(&self) -> watch::Receiver<QuerySnapshot<T>> {
        self.shared.snapshot.subscribe()
    }

    pub fn params(&self) -> P {
        self.shared.state.lock().params.clone()
    }

    /// Number of calls made to the fetcher so far.
    pub fn fetch_count(&self) -> u64 {
        self.shared.state.lock().fetches
    }

    pub fn cache_len(&self) -> usize {
        self.shared.state.lock().cache.len()
    }

    pub fn is_cached(&self, params: &P) -> bool {
        match QueryCache::<T>::key_for(params) {
            Ok(key) => self.shared.state.lock().cache.contains(&key),
            Err(_) => false,
        }
    }
}

impl<P, T> Shared<P, T>
where
    P: Clone + PartialEq + Serialize + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn fire_timer(self: &Arc<Self>, seq: u64) {
        let params = {
            let mut state = self.state.lock();
            if state.timer_seq != seq {
                return;
            }
            state.timer = None;
            state.params.clone()
        };
        debug!("Debounce elapsed, issuing query");
        Self::issue(self, params, true);
    }

    /// `settles_timer` clears `is_pending` in the same update that starts the
    /// request, so watchers never see an idle state in between.
    fn issue(self: &Arc<Self>, params: P, settles_timer: bool) {
        let key = match QueryCache::<T>::key_for(&params) {
            Ok(key) => key,
            Err(e) => {
                let mut state = self.state.lock();
                state.issued += 1;
                let generation = state.issued;
                if settles_timer {
                    self.snapshot.send_modify(|s| s.status.is_pending = false);
                }
                self.commit_error(&state, generation, e);
                return;
            }
        };

        let (generation, epoch) = {
            let mut state = self.state.lock();
            state.issued += 1;
            let generation = state.issued;

            if let Some(value) = state.cache.get(&key).cloned() {
                debug!(key = %key, generation, "Query cache hit");
                self.snapshot.send_modify(|s| {
                    s.value = value;
                    s.status.is_loading = false;
                    s.status.is_pending &= !settles_timer;
                    s.last_error = None;
                    s.generation = generation;
                });
                return;
            }

            debug!(key = %key, generation, "Query cache miss, fetching");
            state.fetches += 1;
            self.snapshot.send_modify(|s| {
                s.status.is_loading = true;
                s.status.is_pending &= !settles_timer;
            });
            (generation, state.epoch)
        };

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = shared.fetcher.fetch(&params).await;
            shared.complete(generation, epoch, key, result);
        });
    }

    fn complete(&self, generation: u64, epoch: u64, key: String, result: Result<T>) {
        let mut state = self.state.lock();
        match result {
            Ok(value) => {
                let superseded = state.stored.get(&key).is_some_and(|g| *g > generation);
                if epoch != state.epoch || superseded {
                    debug!(key = %key, generation, "Not caching result fetched before a newer one");
                } else {
                    state.stored.insert(key.clone(), generation);
                    let evicted = state.cache.insert(key, value.clone());
                    for old in &evicted {
                        state.stored.remove(old);
                    }
                    if !evicted.is_empty() {
                        debug!(evicted = ?evicted, "Evicted oldest query results");
                    }
                }
                if generation != state.issued {
                    warn!(
                        generation,
                        latest = state.issued,
                        "Discarding stale query response"
                    );
                    return;
                }
                self.snapshot.send_modify(|s| {
                    s.value = value;
                    s.status.is_loading = false;
                    s.last_error = None;
                    s.generation = generation;
                });
            }
            Err(e) => self.commit_error(&state, generation, e),
        }
    }

    fn commit_error(&self, state: &State<P, T>, generation: u64, e: anyhow::Error) {
        if generation != state.issued {
            warn!(
                generation,
                latest = state.issued,
                error = %e,
                "Ignoring failure of a superseded query"
            );
            return;
        }
        error!(generation, error = %e, "Query failed");
        self.snapshot.send_modify(|s| {
            s.status.is_loading = false;
            s.last_error = Some(Arc::new(e));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    /// Echoes the parameter back after a per-parameter delay and records
    /// every call.
    struct ScriptedFetcher {
        delays: Map<String, Duration>,
        failing: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new() -> Self {
            Self {
                delays: Map::new(),
                failing: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, params: &str, delay_ms: u64) -> Self {
            self.delays
                .insert(params.to_string(), Duration::from_millis(delay_ms));
            self
        }

        fn failing_on(mut self, params: &str) -> Self {
            self.failing.push(params.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Fetcher<String, String> for ScriptedFetcher {
        async fn fetch(&self, params: &String) -> Result<String> {
            self.calls.lock().push(params.clone());
            let delay = self
                .delays
                .get(params)
                .copied()
                .unwrap_or(Duration::from_millis(10));
            tokio::time::sleep(delay).await;
            if self.failing.contains(params) {
                anyhow::bail!("store unavailable for {}", params);
            }
            Ok(format!("rows for {}", params))
        }
    }

    fn query(fetcher: Arc<ScriptedFetcher>, params: &str) -> DebouncedQuery<String, String> {
        DebouncedQuery::new(
            String::new(),
            fetcher,
            params.to_string(),
            QueryOptions::default(),
        )
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn test_cache_evicts_oldest_inserted_key() {
        let mut cache = QueryCache::new(10);
        for i in 0..11 {
            cache.insert(format!("key-{}", i), i);
        }
        assert_eq!(cache.len(), 10);
        assert!(!cache.contains("key-0"));
        assert!(cache.contains("key-1"));
        assert!(cache.contains("key-10"));
        assert_eq!(cache.keys().next(), Some("key-1"));
    }

    #[test]
    fn test_cache_reinsert_keeps_position() {
        let mut cache = QueryCache::new(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        // reading or overwriting "a" does not make it younger
        assert_eq!(cache.get("a"), Some(&1));
        cache.insert("a".to_string(), 10);
        let evicted = cache.insert("c".to_string(), 3);
        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_cache_key_is_json() {
        let key = QueryCache::<()>::key_for(&("2026-01-01", Some("acme"), None::<String>)).unwrap();
        assert_eq!(key, r#"["2026-01-01","acme",null]"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_fetches_immediately() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let q = query(fetcher.clone(), "p0");

        q.activate();
        assert!(q.status().is_loading);
        assert!(!q.status().is_pending);

        sleep_ms(20).await;
        assert_eq!(q.value(), "rows for p0");
        assert!(!q.status().is_loading);
        assert_eq!(fetcher.calls(), vec!["p0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_issues_one_fetch_with_latest_params() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let q = query(fetcher.clone(), "p0");

        q.set_params("p1".to_string());
        assert!(q.status().is_pending);
        sleep_ms(100).await;
        q.set_params("p2".to_string());
        sleep_ms(100).await;
        q.set_params("p3".to_string());
        sleep_ms(299).await;
        assert!(fetcher.calls().is_empty());
        assert!(q.status().is_pending);

        sleep_ms(50).await;
        assert_eq!(fetcher.calls(), vec!["p3"]);
        assert!(!q.status().is_pending);
        assert_eq!(q.value(), "rows for p3");
        assert_eq!(q.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_does_not_overwrite_newer_one() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .with_delay("a", 500)
                .with_delay("b", 50),
        );
        let q = query(fetcher.clone(), "p0");

        q.set_params("a".to_string());
        // timer fires at 300ms, "a" resolves at 800ms
        sleep_ms(350).await;
        assert!(q.status().is_loading);
        q.set_params("b".to_string());
        // timer fires at 650ms, "b" resolves at 700ms
        sleep_ms(370).await;
        assert_eq!(q.value(), "rows for b");

        sleep_ms(200).await;
        assert_eq!(fetcher.calls(), vec!["a", "b"]);
        assert_eq!(q.value(), "rows for b");
        assert!(!q.status().is_loading);
        // the late result is still remembered for next time
        assert!(q.is_cached(&"a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_fetch_and_loading() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let q = query(fetcher.clone(), "p0");
        q.activate();
        sleep_ms(20).await;

        q.set_params("p1".to_string());
        sleep_ms(400).await;
        assert_eq!(q.value(), "rows for p1");

        let mut rx = q.subscribe();
        rx.borrow_and_update();
        q.set_params("p0".to_string());
        sleep_ms(300).await;
        assert_eq!(q.value(), "rows for p0");
        assert!(!q.status().is_loading);
        assert_eq!(fetcher.calls(), vec!["p0", "p1"]);
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setting_same_params_is_noop() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let q = query(fetcher.clone(), "p0");
        q.set_params("p0".to_string());
        assert!(!q.status().is_pending);
        sleep_ms(400).await;
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_reported_and_not_cached() {
        let fetcher = Arc::new(ScriptedFetcher::new().failing_on("bad"));
        let q = query(fetcher.clone(), "p0");
        q.activate();
        sleep_ms(20).await;

        q.set_params("bad".to_string());
        sleep_ms(400).await;
        let error = q.last_error().expect("failure should be published");
        assert!(error.to_string().contains("store unavailable"));
        assert!(!q.status().is_loading);
        assert_eq!(q.value(), "rows for p0");
        assert!(!q.is_cached(&"bad".to_string()));

        // retrying the same parameters goes back to the fetcher
        q.set_params("p0".to_string());
        sleep_ms(400).await;
        q.set_params("bad".to_string());
        sleep_ms(400).await;
        assert_eq!(fetcher.calls(), vec!["p0", "bad", "bad"]);

        q.set_params("p0".to_string());
        sleep_ms(400).await;
        assert!(q.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleven_distinct_params_keep_ten_entries() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let q = query(fetcher.clone(), "k0");
        q.activate();
        sleep_ms(20).await;
        for i in 1..11 {
            q.set_params(format!("k{}", i));
            sleep_ms(400).await;
        }
        assert_eq!(q.cache_len(), 10);
        assert!(!q.is_cached(&"k0".to_string()));
        assert!(q.is_cached(&"k10".to_string()));
    }

    /// Answers with the parameters and a call counter; the first call is slow.
    struct VersionedFetcher {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Fetcher<String, String> for VersionedFetcher {
        async fn fetch(&self, params: &String) -> Result<String> {
            let version = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            let delay = if version == 1 { 500 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(format!("{} v{}", params, version))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_in_flight_during_refresh_is_not_cached() {
        let fetcher = Arc::new(VersionedFetcher {
            calls: Mutex::new(0),
        });
        let q = DebouncedQuery::new(String::new(), fetcher, "p0".to_string(), QueryOptions::default());
        q.activate();
        sleep_ms(100).await;
        q.refresh();
        sleep_ms(50).await;
        assert_eq!(q.value(), "p0 v2");

        q.set_params("p1".to_string());
        sleep_ms(400).await;
        assert_eq!(q.value(), "p1 v3");
        // the first fetch for p0 has landed by now

        q.set_params("p0".to_string());
        sleep_ms(400).await;
        assert_eq!(q.value(), "p0 v2");
        assert_eq!(q.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_bypasses_cache() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let q = query(fetcher.clone(), "p0");
        q.activate();
        sleep_ms(20).await;
        q.refresh();
        sleep_ms(20).await;
        assert_eq!(fetcher.calls(), vec!["p0", "p0"]);
    }
}
