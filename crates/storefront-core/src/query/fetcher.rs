//! The seam between the fetch policy and whatever performs network I/O.

use std::future::Future;

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};

use crate::models::{BusinessId, CategoryList};

/// Loads a business's categories from a remote source.
///
/// Returned futures must be `'static` so the policy can drive them from a
/// background task; implementations clone whatever they need up front.
pub trait RemoteFetcher: Send + Sync + 'static {
    fn fetch(&self, business_id: &BusinessId, token: Option<&str>)
        -> BoxFuture<'static, Result<CategoryList>>;
}

impl<F, Fut> RemoteFetcher for F
where
    F: Fn(BusinessId, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CategoryList>> + Send + 'static,
{
    fn fetch(&self, business_id: &BusinessId, token: Option<&str>)
        -> BoxFuture<'static, Result<CategoryList>> {
        self(business_id.clone(), token.map(str::to_owned)).boxed()
    }
}
