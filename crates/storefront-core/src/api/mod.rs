//! REST API client module for the storefront backend.
//!
//! This module provides the `ApiClient`, the HTTP implementation of
//! `RemoteFetcher` used to load a business's categories.
//!
//! Requests are authorized with an optional bearer token supplied by the
//! caller; the client itself holds no session state.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
