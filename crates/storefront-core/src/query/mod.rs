//! Fetch policy for a business's category list.
//!
//! This module provides:
//! - `CategoryFetchPolicy`: Guarded, cached, coalesced, retrying category fetches
//! - `CategoryQuery`: A handle that follows changing inputs (business, token, enabled)
//! - `RemoteFetcher`: The seam for whatever performs the network call
//! - `RetryPolicy`: Capped exponential backoff (1s, 2s, ... up to 30s)
//! - `FetchState` / `CategorySnapshot`: What consumers observe

pub mod fetcher;
pub mod observer;
pub mod policy;
pub mod retry;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use fetcher::RemoteFetcher;
pub use observer::{CategoryQuery, QueryOptions};
pub use policy::CategoryFetchPolicy;
pub use retry::RetryPolicy;
pub use state::{CategorySnapshot, FetchState, FetchStatus};
