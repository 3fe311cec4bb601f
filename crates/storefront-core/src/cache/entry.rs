use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::models::CategoryList;
use crate::query::{CategorySnapshot, FetchState};

pub(crate) type LoadFuture = BoxFuture<'static, Result<Arc<CategoryList>, FetchError>>;
pub(crate) type SharedLoad = Shared<LoadFuture>;

/// The one fetch currently allowed to write to an entry.
pub(crate) struct InFlight {
    pub generation: u64,
    pub load: SharedLoad,
    pub task: JoinHandle<()>,
}

pub(crate) struct CacheEntry {
    pub state: FetchState,
    /// Completion time of the last successful fetch; `None` forces a refetch.
    pub updated_at: Option<Instant>,
    /// Wall-clock counterpart of `updated_at`, for display.
    pub fetched_at: Option<DateTime<Utc>>,
    pub in_flight: Option<InFlight>,
    pub observers: usize,
    pub idle_since: Instant,
    notifier: watch::Sender<FetchState>,
}

impl CacheEntry {
    pub fn new(now: Instant) -> Self {
        let (notifier, _) = watch::channel(FetchState::Idle);
        Self {
            state: FetchState::Idle,
            updated_at: None,
            fetched_at: None,
            in_flight: None,
            observers: 0,
            idle_since: now,
            notifier,
        }
    }

    pub fn set_state(&mut self, state: FetchState) {
        self.state = state.clone();
        self.notifier.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.notifier.subscribe()
    }

    /// Cached data, if it is still within the freshness window.
    pub fn fresh_data(&self, now: Instant, stale_time: Duration) -> Option<Arc<CategoryList>> {
        let updated_at = self.updated_at?;
        if now.saturating_duration_since(updated_at) < stale_time {
            self.state.data().cloned()
        } else {
            None
        }
    }

    pub fn is_expired(&self, now: Instant, gc_time: Duration) -> bool {
        self.observers == 0
            && self.in_flight.is_none()
            && now.saturating_duration_since(self.idle_since) >= gc_time
    }

    pub fn snapshot(&self) -> CategorySnapshot {
        CategorySnapshot::from_state(&self.state, self.in_flight.is_some(), self.fetched_at)
    }
}
