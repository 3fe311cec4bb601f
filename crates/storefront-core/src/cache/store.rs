use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::FetchError;
use crate::models::{BusinessId, CategoryList};
use crate::query::{CategorySnapshot, FetchState};

use super::entry::{CacheEntry, InFlight, LoadFuture, SharedLoad};

/// Logical name of the category endpoint, the first half of every key.
pub const CATEGORIES_SCOPE: &str = "business-categories";

/// Data younger than this is served without calling the fetcher.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Entries without observers are evicted after this long.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    scope: &'static str,
    business_id: BusinessId,
}

impl QueryKey {
    pub fn categories(business_id: BusinessId) -> Self {
        Self {
            scope: CATEGORIES_SCOPE,
            business_id,
        }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn business_id(&self) -> &BusinessId {
        &self.business_id
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.business_id)
    }
}

/// What a requester gets back from the cache.
pub(crate) enum Lookup {
    /// Data to use right away: fresh, or stale with a refresh running behind it.
    Ready(Arc<CategoryList>),
    /// Nothing usable yet; await the shared fetch.
    Pending(SharedLoad),
}

/// Shared, cheaply cloneable handle to the per-business cache.
///
/// Fetches are spawned onto the current tokio runtime, so the methods that
/// start one must be called from within a runtime.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

struct Inner {
    entries: Mutex<HashMap<QueryKey, CacheEntry>>,
    generation: AtomicU64,
    stale_time: Duration,
    gc_time: Duration,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_TIME, DEFAULT_GC_TIME)
    }
}

impl QueryCache {
    pub fn new(stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                stale_time,
                gc_time,
            }),
        }
    }

    pub fn stale_time(&self) -> Duration {
        self.inner.stale_time
    }

    pub fn gc_time(&self) -> Duration {
        self.inner.gc_time
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
        // Entries are only mutated in short, non-panicking sections
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    // ===== Fetching =====

    /// Return fresh data, join the in-flight fetch, or start a new one.
    ///
    /// Stale data is returned immediately while a refresh runs in the
    /// background. `load` is only invoked when a new fetch is started.
    pub(crate) fn get_or_start<F>(&self, key: &QueryKey, load: F) -> Lookup
    where
        F: FnOnce() -> LoadFuture,
    {
        let now = Instant::now();
        let mut entries = self.entries();
        Self::evict_expired(&mut entries, now, self.inner.gc_time);
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(now));

        if let Some(data) = entry.fresh_data(now, self.inner.stale_time) {
            debug!(key = %key, "Cache hit");
            return Lookup::Ready(data);
        }

        let stale = entry.state.data().cloned();
        let joined = entry
            .in_flight
            .as_ref()
            .map(|in_flight| (in_flight.generation, in_flight.load.clone()));
        let pending = match joined {
            Some((generation, shared)) => {
                debug!(key = %key, generation, "Joining in-flight fetch");
                shared
            }
            None => {
                debug!(key = %key, stale = stale.is_some(), "Cache miss, fetching");
                self.start_locked(key, entry, load())
            }
        };

        match stale {
            Some(data) => Lookup::Ready(data),
            None => Lookup::Pending(pending),
        }
    }

    /// Start a new fetch unconditionally, superseding any in flight, and
    /// move the entry to `Loading`.
    pub(crate) fn refetch(&self, key: &QueryKey, load: LoadFuture) -> SharedLoad {
        let now = Instant::now();
        let mut entries = self.entries();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(now));
        let pending = self.start_locked(key, entry, load);
        entry.set_state(FetchState::Loading);
        pending
    }

    fn start_locked(&self, key: &QueryKey, entry: &mut CacheEntry, load: LoadFuture) -> SharedLoad {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(previous) = entry.in_flight.take() {
            debug!(key = %key, superseded = previous.generation, generation, "Superseding in-flight fetch");
            previous.task.abort();
        }

        let cache = Arc::downgrade(&self.inner);
        let settle_key = key.clone();
        let pending = async move {
            let result = load.await;
            if let Some(cache) = Self::from_weak(&cache) {
                cache.settle(&settle_key, generation, &result);
            }
            result
        }
        .boxed()
        .shared();

        // Drive the fetch to completion even if every requester goes away
        let task = tokio::spawn(pending.clone().map(drop));

        entry.in_flight = Some(InFlight {
            generation,
            load: pending.clone(),
            task,
        });
        if entry.state.data().is_none() {
            entry.set_state(FetchState::Loading);
        }
        pending
    }

    /// Record the outcome of a fetch, unless a newer fetch has replaced it.
    fn settle(&self, key: &QueryKey, generation: u64, result: &Result<Arc<CategoryList>, FetchError>) {
        let now = Instant::now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            debug!(key = %key, generation, "Entry removed before fetch completed");
            return;
        };
        if entry.in_flight.as_ref().map(|f| f.generation) != Some(generation) {
            debug!(key = %key, generation, "Discarding result of superseded fetch");
            return;
        }

        entry.in_flight = None;
        match result {
            Ok(data) => {
                debug!(key = %key, generation, count = data.len(), "Fetch succeeded");
                entry.updated_at = Some(now);
                entry.fetched_at = Some(Utc::now());
                entry.set_state(FetchState::Success(Arc::clone(data)));
            }
            Err(e) => {
                debug!(key = %key, generation, error = %e, "Fetch failed");
                entry.set_state(FetchState::Error(e.clone()));
            }
        }

        if entry.observers == 0 {
            entry.idle_since = now;
            drop(entries);
            self.schedule_gc();
        }
    }

    // ===== Observers =====

    /// Register interest in a key, creating its entry if needed.
    pub(crate) fn observe(&self, key: &QueryKey) {
        let now = Instant::now();
        let mut entries = self.entries();
        Self::evict_expired(&mut entries, now, self.inner.gc_time);
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(now));
        entry.observers += 1;
    }

    pub(crate) fn unobserve(&self, key: &QueryKey) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.observers = entry.observers.saturating_sub(1);
        if entry.observers == 0 {
            entry.idle_since = Instant::now();
            drop(entries);
            self.schedule_gc();
        }
    }

    pub fn subscribe(&self, key: &QueryKey) -> Option<watch::Receiver<FetchState>> {
        self.entries().get(key).map(CacheEntry::subscribe)
    }

    // ===== Inspection =====

    pub fn state(&self, key: &QueryKey) -> FetchState {
        self.entries()
            .get(key)
            .map(|entry| entry.state.clone())
            .unwrap_or(FetchState::Idle)
    }

    pub fn snapshot(&self, key: &QueryKey) -> CategorySnapshot {
        self.entries()
            .get(key)
            .map(CacheEntry::snapshot)
            .unwrap_or_else(CategorySnapshot::idle)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.entries()
            .get(key)
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ===== Invalidation & Eviction =====

    /// Mark an entry stale so its next access refetches. Returns whether the
    /// entry currently has observers.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        match self.entries().get_mut(key) {
            Some(entry) => {
                entry.updated_at = None;
                entry.observers > 0
            }
            None => false,
        }
    }

    /// Forget all cached data, aborting fetches in flight.
    ///
    /// Unobserved entries are removed. Observed entries stay, reset to `Idle`
    /// with their observer count intact, so subscribers keep a live channel
    /// and retention still sees them as in use.
    pub fn clear(&self) {
        let now = Instant::now();
        let mut entries = self.entries();
        entries.retain(|key, entry| {
            if let Some(in_flight) = entry.in_flight.take() {
                debug!(key = %key, generation = in_flight.generation, "Aborting fetch on clear");
                in_flight.task.abort();
            }
            if entry.observers == 0 {
                return false;
            }
            entry.updated_at = None;
            entry.fetched_at = None;
            entry.idle_since = now;
            entry.set_state(FetchState::Idle);
            true
        });
    }

    /// Evict entries that have gone unobserved for the retention window.
    /// Returns the number of entries removed.
    pub fn collect_garbage(&self) -> usize {
        let mut entries = self.entries();
        Self::evict_expired(&mut entries, Instant::now(), self.inner.gc_time)
    }

    fn evict_expired(entries: &mut HashMap<QueryKey, CacheEntry>, now: Instant, gc_time: Duration) -> usize {
        let before = entries.len();
        entries.retain(|key, entry| {
            let expired = entry.is_expired(now, gc_time);
            if expired {
                debug!(key = %key, "Evicting unused cache entry");
            }
            !expired
        });
        before - entries.len()
    }

    fn schedule_gc(&self) {
        // Without a runtime (e.g. a handle dropped at shutdown) eviction
        // still happens lazily on the next access
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cache = Arc::downgrade(&self.inner);
        let gc_time = self.inner.gc_time;
        runtime.spawn(async move {
            tokio::time::sleep(gc_time).await;
            if let Some(cache) = Self::from_weak(&cache) {
                cache.collect_garbage();
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
