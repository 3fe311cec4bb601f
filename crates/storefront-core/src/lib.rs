//! Storefront Core Library
//!
//! Shared library for storefront clients, providing:
//! - `CategoryFetchPolicy`: guarded, cached, coalesced and retrying fetches
//!   of a business's category list
//! - `CategoryQuery`: a handle that follows the selected business, token and
//!   enabled flag the way a UI component would
//! - HTTP `ApiClient` implementing the `RemoteFetcher` seam
//! - Data models and configuration

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod query;

pub use api::{ApiClient, ApiError};
pub use cache::{QueryCache, QueryKey};
pub use config::{Config, QueryConfig};
pub use error::FetchError;
pub use models::{BusinessId, Category, CategoryList};
pub use query::{
    CategoryFetchPolicy, CategoryQuery, CategorySnapshot, FetchState, FetchStatus, QueryOptions,
    RemoteFetcher, RetryPolicy,
};
