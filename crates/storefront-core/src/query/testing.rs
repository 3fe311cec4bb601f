//! Scripted fetchers for exercising the policy without a network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{BusinessId, Category, CategoryList};

use super::RemoteFetcher;

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub at: Instant,
    pub business_id: String,
    pub token: Option<String>,
}

#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call and return how many earlier calls were made for the same business.
    fn record(&self, business_id: &BusinessId, token: Option<String>) -> usize {
        let mut calls = self.0.lock().unwrap();
        let previous = calls.iter().filter(|c| c.business_id == business_id.as_str()).count();
        calls.push(Call {
            at: Instant::now(),
            business_id: business_id.to_string(),
            token,
        });
        previous
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn count_for(&self, business_id: &str) -> usize {
        self.calls().iter().filter(|c| c.business_id == business_id).count()
    }
}

pub(crate) fn categories(ids: &[&str]) -> CategoryList {
    ids.iter().map(|id| Category::new(*id, id.to_uppercase())).collect()
}

pub(crate) fn business(id: &str) -> BusinessId {
    BusinessId::parse(id).unwrap()
}

/// A fetcher that logs every call, waits `delay`, then answers with
/// `respond(business_id, nth_call_for_that_business)`.
pub(crate) fn scripted<F>(log: &CallLog, delay: Duration, respond: F) -> impl RemoteFetcher
where
    F: Fn(&str, usize) -> anyhow::Result<CategoryList> + Send + Sync + 'static,
{
    let log = log.clone();
    move |business_id: BusinessId, token: Option<String>| {
        let nth = log.record(&business_id, token);
        let result = respond(business_id.as_str(), nth);
        async move {
            tokio::time::sleep(delay).await;
            result
        }
    }
}
