//! API client for the storefront backend.
//!
//! This module provides the `ApiClient` struct for making optionally
//! authenticated requests for a business's category list.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::{header, Client};
use tracing::debug;

use crate::models::{BusinessId, CategoryList};
use crate::query::RemoteFetcher;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL for the storefront API
pub const DEFAULT_API_BASE_URL: &str = "https://api.storefront.local/v1";

/// HTTP request timeout in seconds.
/// The fetch policy retries on top of this, so a single attempt fails reasonably fast.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// API client for the storefront backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client against the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn categories_url(&self, business_id: &BusinessId) -> String {
        format!("{}/businesses/{}/categories", self.base_url, business_id)
    }

    fn headers(token: Option<&str>) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("Auth token contains invalid header characters")?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_response(status, &headers, &body).into())
        }
    }

    // ===== Data Fetching Methods =====

    /// Fetch the category list for a business
    pub async fn fetch_categories(
        &self,
        business_id: &BusinessId,
        token: Option<&str>,
    ) -> Result<CategoryList> {
        let url = self.categories_url(business_id);
        debug!(url = %url, authenticated = token.is_some(), "Fetching categories");

        let response = self
            .client
            .get(&url)
            .headers(Self::headers(token)?)
            .send()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send GET request to {}", url))?;

        let response = Self::check_response(response).await?;

        let body = response.text().await.map_err(ApiError::from)?;
        let categories: CategoryList = serde_json::from_str(&body)
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to parse categories response from {}", url))?;

        debug!(business = %business_id, count = categories.len(), "Categories received");
        Ok(categories)
    }
}

impl RemoteFetcher for ApiClient {
    fn fetch(&self, business_id: &BusinessId, token: Option<&str>)
        -> BoxFuture<'static, Result<CategoryList>> {
        let client = self.clone();
        let business_id = business_id.clone();
        let token = token.map(str::to_owned);
        async move { client.fetch_categories(&business_id, token.as_deref()).await }.boxed()
    }
}
