//! Data models for storefront entities.
//!
//! This module contains the data structures shared with the web client:
//!
//! - `BusinessId`: Identifier of the business whose storefront is active
//! - `Category`, `CategoryList`: A business's product categories

pub mod business;
pub mod category;

pub use business::BusinessId;
pub use category::{Category, CategoryList};
