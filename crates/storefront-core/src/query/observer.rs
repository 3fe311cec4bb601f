//! A category query that follows its inputs.
//!
//! UI code changes the selected business, the auth token or the enabled
//! flag over time. `CategoryQuery` recomputes its cache key on every change:
//! a new key is a new logical request, and the previous key's in-flight
//! fetch is left to finish into its own entry without affecting this view.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::cache::QueryKey;
use crate::error::FetchError;
use crate::models::{BusinessId, CategoryList};

use super::policy::CategoryFetchPolicy;
use super::state::{CategorySnapshot, FetchState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub business_id: Option<BusinessId>,
    pub token: Option<String>,
    pub enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            business_id: None,
            token: None,
            enabled: true,
        }
    }
}

impl QueryOptions {
    pub fn new(business_id: Option<BusinessId>) -> Self {
        Self {
            business_id,
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The key to observe, or `None` when the query must stay idle.
    fn active_key(&self) -> Option<QueryKey> {
        if !self.enabled {
            return None;
        }
        self.business_id.clone().map(QueryKey::categories)
    }
}

/// Observer of one business's categories at a time. Dropping it releases
/// the observed entry so retention can start counting.
pub struct CategoryQuery {
    policy: CategoryFetchPolicy,
    options: QueryOptions,
    observed: Option<QueryKey>,
}

impl CategoryQuery {
    pub(crate) fn new(policy: CategoryFetchPolicy, options: QueryOptions) -> Self {
        let mut query = Self {
            policy,
            options,
            observed: None,
        };
        query.sync();
        query
    }

    /// Move observation to the key implied by the current options, fetching
    /// for a newly observed key when its data is not fresh.
    fn sync(&mut self) {
        let next = self.options.active_key();
        if next == self.observed {
            return;
        }

        if let Some(previous) = self.observed.take() {
            debug!(key = %previous, "Stopped observing");
            self.policy.cache.unobserve(&previous);
        }
        if let Some(key) = &next {
            debug!(key = %key, "Observing");
            self.policy.cache.observe(key);
            self.policy.ensure(key, self.options.token.as_deref());
        }
        self.observed = next;
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn key(&self) -> Option<&QueryKey> {
        self.observed.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.observed.is_some()
    }

    pub fn set_business(&mut self, business_id: Option<BusinessId>) {
        if self.options.business_id != business_id {
            self.options.business_id = business_id;
            self.sync();
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.options.enabled != enabled {
            self.options.enabled = enabled;
            self.sync();
        }
    }

    /// Replace the token used by future fetches. The cache key does not
    /// include the token, so nothing is refetched.
    pub fn set_token(&mut self, token: Option<String>) {
        self.options.token = token;
    }

    /// `Idle` whenever the query is disabled or has no business.
    pub fn state(&self) -> FetchState {
        match &self.observed {
            Some(key) => self.policy.cache.state(key),
            None => FetchState::Idle,
        }
    }

    pub fn snapshot(&self) -> CategorySnapshot {
        match &self.observed {
            Some(key) => self.policy.cache.snapshot(key),
            None => CategorySnapshot::idle(),
        }
    }

    /// Receiver for state changes of the currently observed key. Resubscribe
    /// after changing the business or enabled flag.
    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.observed
            .as_ref()
            .and_then(|key| self.policy.cache.subscribe(key))
            .unwrap_or_else(|| watch::channel(FetchState::Idle).1)
    }

    /// Wait until the observed state is no longer `Loading`.
    pub async fn settled(&self) -> FetchState {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.state())
    }

    /// Force a fetch with the current business and token.
    ///
    /// A disabled query never reaches the fetcher and yields `Ok(None)`.
    /// Without a business this fails with `MissingIdentifier`.
    pub async fn refetch(&self) -> Result<Option<Arc<CategoryList>>, FetchError> {
        let business_id = self
            .options
            .business_id
            .as_ref()
            .ok_or(FetchError::MissingIdentifier)?;
        if !self.options.enabled {
            debug!(business = %business_id, "Refetch skipped, query disabled");
            return Ok(None);
        }
        self.policy
            .refetch(Some(business_id), self.options.token.as_deref())
            .await
            .map(Some)
    }

    /// Mark the current business's categories stale and refresh them now.
    pub fn invalidate(&self) {
        if let Some(key) = &self.observed {
            self.policy.cache.invalidate(key);
            self.policy.ensure(key, self.options.token.as_deref());
        }
    }
}

impl Drop for CategoryQuery {
    fn drop(&mut self) {
        if let Some(key) = self.observed.take() {
            self.policy.cache.unobserve(&key);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
