//! Failures talking to the storefront API.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Sign-in required - token may be missing or expired")]
    Unauthorized,

    #[error("No access to this business's catalog: {0}")]
    Forbidden(String),

    #[error("Business not found")]
    BusinessNotFound,

    #[error("Rate limited{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Storefront API error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Unexpected response (HTTP {status}): {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Malformed category list: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(", retry after {}s", secs),
        None => String::new(),
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl ApiError {
    /// Classify a non-success response.
    pub fn from_response(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::Forbidden(truncate_body(body)),
            StatusCode::NOT_FOUND => ApiError::BusinessNotFound,
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
                retry_after_secs: headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok()),
            },
            s if s.is_server_error() => ApiError::Server {
                status: s.as_u16(),
                body: truncate_body(body),
            },
            s => ApiError::UnexpectedStatus {
                status: s.as_u16(),
                body: truncate_body(body),
            },
        }
    }
}
