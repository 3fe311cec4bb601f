//! In-memory query cache for business category lists.
//!
//! This module provides the `QueryCache` used by the fetch policy. Each
//! business gets one entry keyed by `QueryKey`, holding:
//! - The last settled state (loading, success or error)
//! - When the data was last fetched, to decide freshness (5 minutes by default)
//! - The single in-flight fetch that concurrent requesters share
//! - How many observers are watching, to decide retention (30 minutes by default)
//!
//! Nothing is persisted; a process restart is a cold start.

mod entry;
pub mod store;

pub(crate) use entry::LoadFuture;
pub(crate) use store::Lookup;
pub use store::{QueryCache, QueryKey, CATEGORIES_SCOPE, DEFAULT_GC_TIME, DEFAULT_STALE_TIME};
