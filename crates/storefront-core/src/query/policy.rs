//! Cached, coalesced, retrying fetches of a business's categories.

use std::sync::Arc;

use futures::future::FutureExt;

use crate::cache::{LoadFuture, Lookup, QueryCache, QueryKey};
use crate::config::QueryConfig;
use crate::error::FetchError;
use crate::models::{BusinessId, CategoryList};

use super::observer::{CategoryQuery, QueryOptions};
use super::state::{CategorySnapshot, FetchState};
use super::{RemoteFetcher, RetryPolicy};

/// Decides whether, when and how persistently to call the `RemoteFetcher`.
///
/// - Fresh data (5 minutes by default) is served from the cache.
/// - Stale data is served immediately while a refresh runs in the background.
/// - Concurrent requests for one business share a single fetch.
/// - Failures are retried with capped exponential backoff before surfacing.
///
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct CategoryFetchPolicy {
    pub(crate) cache: QueryCache,
    fetcher: Arc<dyn RemoteFetcher>,
    retry: RetryPolicy,
}

impl CategoryFetchPolicy {
    pub fn new(fetcher: impl RemoteFetcher) -> Self {
        Self::with_config(fetcher, &QueryConfig::default())
    }

    pub fn with_config(fetcher: impl RemoteFetcher, config: &QueryConfig) -> Self {
        Self {
            cache: QueryCache::new(config.stale_time(), config.gc_time()),
            fetcher: Arc::new(fetcher),
            retry: config.retry_policy(),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn key_for(business_id: Option<&BusinessId>) -> Result<QueryKey, FetchError> {
        business_id
            .cloned()
            .map(QueryKey::categories)
            .ok_or(FetchError::MissingIdentifier)
    }

    /// Build the retrying load for `key`. Retries stay inside one load, so
    /// they share a single cache generation.
    fn loader(&self, key: &QueryKey, token: Option<&str>) -> impl FnOnce() -> LoadFuture {
        let fetcher = Arc::clone(&self.fetcher);
        let retry = self.retry.clone();
        let key = key.clone();
        let token = token.map(str::to_owned);
        move || {
            async move {
                let label = key.to_string();
                retry
                    .run(&label, || fetcher.fetch(key.business_id(), token.as_deref()))
                    .await
                    .map(Arc::new)
                    .map_err(|e| FetchError::RemoteFailure(format!("{:#}", e)))
            }
            .boxed()
        }
    }

    /// Fetch categories for a business, honouring the cache.
    ///
    /// Fails immediately with `MissingIdentifier` when no business is given;
    /// that failure is never retried and never reaches the fetcher.
    pub async fn fetch(
        &self,
        business_id: Option<&BusinessId>,
        token: Option<&str>,
    ) -> Result<Arc<CategoryList>, FetchError> {
        let key = Self::key_for(business_id)?;
        match self.cache.get_or_start(&key, self.loader(&key, token)) {
            Lookup::Ready(data) => Ok(data),
            Lookup::Pending(load) => load.await,
        }
    }

    /// Fetch again regardless of freshness, superseding any fetch in flight.
    pub async fn refetch(
        &self,
        business_id: Option<&BusinessId>,
        token: Option<&str>,
    ) -> Result<Arc<CategoryList>, FetchError> {
        let key = Self::key_for(business_id)?;
        let load = self.loader(&key, token)();
        self.cache.refetch(&key, load).await
    }

    /// Start a fetch for `key` if its entry is not fresh and none is running.
    pub(crate) fn ensure(&self, key: &QueryKey, token: Option<&str>) {
        // The spawned fetch settles the entry; nobody needs to await it here
        let _ = self.cache.get_or_start(key, self.loader(key, token));
    }

    /// Mark a business's categories stale; the next access refetches.
    /// Returns whether anyone is currently observing them.
    pub fn invalidate(&self, business_id: &BusinessId) -> bool {
        self.cache.invalidate(&QueryKey::categories(business_id.clone()))
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn state(&self, business_id: &BusinessId) -> FetchState {
        self.cache.state(&QueryKey::categories(business_id.clone()))
    }

    pub fn snapshot(&self, business_id: &BusinessId) -> CategorySnapshot {
        self.cache.snapshot(&QueryKey::categories(business_id.clone()))
    }

    /// Create a handle that keeps the categories for `options` loaded and
    /// follows later changes to the business, token and enabled flag.
    ///
    /// Must be called from within a tokio runtime.
    pub fn query(&self, options: QueryOptions) -> CategoryQuery {
        CategoryQuery::new(self.clone(), options)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;

    use super::*;
    use crate::query::testing::{business, categories, scripted, CallLog};

    fn succeeding(log: &CallLog, delay: Duration) -> CategoryFetchPolicy {
        CategoryFetchPolicy::new(scripted(log, delay, |_, nth| {
            Ok(categories(&[&format!("c{}", nth + 1)]))
        }))
    }

    fn ids(data: &CategoryList) -> Vec<&str> {
        data.iter().map(|c| c.id.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_business_fails_fast_without_calling_fetcher() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::ZERO);
        let start = tokio::time::Instant::now();

        assert_eq!(policy.fetch(None, Some("token")).await, Err(FetchError::MissingIdentifier));
        assert_eq!(policy.refetch(None, None).await, Err(FetchError::MissingIdentifier));

        assert_eq!(log.count(), 0);
        assert_eq!(start.elapsed(), Duration::ZERO, "guard failures are not retried");
        assert!(policy.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_fetcher_makes_three_attempts() {
        let log = CallLog::new();
        let policy = CategoryFetchPolicy::new(scripted(&log, Duration::ZERO, |_, _| {
            Err(anyhow!("503 Service Unavailable"))
        }));
        let b1 = business("B1");

        let result = policy.fetch(Some(&b1), None).await;
        assert_eq!(result, Err(FetchError::RemoteFailure("503 Service Unavailable".to_string())));

        let calls = log.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(1000));
        assert_eq!(calls[2].at - calls[1].at, Duration::from_millis(2000));
        assert!(matches!(policy.state(&b1), FetchState::Error(_)));
        assert_eq!(
            policy.snapshot(&b1).error_reason.as_deref(),
            Some("503 Service Unavailable")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stay_loading_until_final_attempt() {
        let log = CallLog::new();
        let policy = CategoryFetchPolicy::new(scripted(&log, Duration::ZERO, |_, nth| {
            if nth < 2 {
                Err(anyhow!("flaky"))
            } else {
                Ok(categories(&["c1"]))
            }
        }));
        let b1 = business("B1");

        let background = policy.clone();
        let id = b1.clone();
        let handle = tokio::spawn(async move { background.fetch(Some(&id), None).await });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(log.count(), 2);
        assert!(policy.state(&b1).is_loading());

        let data = handle.await.unwrap().unwrap();
        assert_eq!(ids(&data), vec!["c1"]);
        assert_eq!(log.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_data_is_served_from_cache() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::from_millis(50));
        let b1 = business("B1");

        let first = policy.fetch(Some(&b1), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        let second = policy.fetch(Some(&b1), None).await.unwrap();

        assert_eq!(log.count(), 1);
        assert_eq!(ids(&second), vec!["c1"]);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_data_is_served_while_revalidating() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::from_millis(50));
        let b1 = business("B1");

        policy.fetch(Some(&b1), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6 * 60)).await;

        let stale = policy.fetch(Some(&b1), None).await.unwrap();
        assert_eq!(ids(&stale), vec!["c1"]);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(log.count(), 2, "a background refresh was started");
        assert!(policy.snapshot(&b1).is_fetching);
        assert!(matches!(policy.state(&b1), FetchState::Success(_)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let refreshed = policy.fetch(Some(&b1), None).await.unwrap();
        assert_eq!(ids(&refreshed), vec!["c2"]);
        assert_eq!(log.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_coalesced() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::from_millis(100));
        let b2 = business("B2");

        let (a, b) = tokio::join!(policy.fetch(Some(&b2), None), policy.fetch(Some(&b2), None));

        assert_eq!(log.count(), 1);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_evicted_after_retention_window() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::ZERO);
        let b3 = business("B3");

        policy.fetch(Some(&b3), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        assert!(policy.cache().is_empty());
        assert_eq!(policy.state(&b3), FetchState::Idle);

        let data = policy.fetch(Some(&b3), None).await.unwrap();
        assert_eq!(log.count(), 2, "cold start after eviction");
        assert_eq!(ids(&data), vec!["c2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_does_not_change_cache_key() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::ZERO);
        let b1 = business("B1");

        policy.fetch(Some(&b1), Some("t1")).await.unwrap();
        policy.fetch(Some(&b1), Some("t2")).await.unwrap();

        let calls = log.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].token.as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_still_populates_cache() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::from_millis(100));
        let b1 = business("B1");

        let abandoned = tokio::time::timeout(Duration::from_millis(10), policy.fetch(Some(&b1), None)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(policy.state(&b1), FetchState::Success(_)));
        policy.fetch(Some(&b1), None).await.unwrap();
        assert_eq!(log.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_ignores_freshness() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::ZERO);
        let b1 = business("B1");

        policy.fetch(Some(&b1), None).await.unwrap();
        let data = policy.refetch(Some(&b1), Some("fresh-token")).await.unwrap();

        assert_eq!(ids(&data), vec!["c2"]);
        assert_eq!(log.count(), 2);
        assert_eq!(log.calls()[1].token.as_deref(), Some("fresh-token"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_next_fetch() {
        let log = CallLog::new();
        let policy = succeeding(&log, Duration::ZERO);
        let b1 = business("B1");

        policy.fetch(Some(&b1), None).await.unwrap();
        assert!(!policy.invalidate(&b1), "nobody is observing");

        // Stale data comes back immediately; the refresh runs behind it
        let stale = policy.fetch(Some(&b1), None).await.unwrap();
        assert_eq!(ids(&stale), vec!["c1"]);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(log.count(), 2);
        assert_eq!(policy.state(&b1).data().map(|d| ids(d)), Some(vec!["c2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_config_is_applied() {
        let log = CallLog::new();
        let config = QueryConfig {
            stale_time_secs: 10,
            retry: 0,
            ..QueryConfig::default()
        };
        let policy = CategoryFetchPolicy::with_config(
            scripted(&log, Duration::ZERO, |_, _| Err(anyhow!("down"))),
            &config,
        );

        assert!(policy.fetch(Some(&business("B1")), None).await.is_err());
        assert_eq!(log.count(), 1);
        assert_eq!(policy.cache().stale_time(), Duration::from_secs(10));
        assert_eq!(policy.retry_policy().retries, 0);
    }
}
