//! Observable state of a category query.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FetchError;
use crate::models::CategoryList;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    Idle,
    Loading,
    Success(Arc<CategoryList>),
    Error(FetchError),
}

impl FetchState {
    pub fn status(&self) -> FetchStatus {
        match self {
            FetchState::Idle => FetchStatus::Idle,
            FetchState::Loading => FetchStatus::Loading,
            FetchState::Success(_) => FetchStatus::Success,
            FetchState::Error(_) => FetchStatus::Error,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, FetchState::Loading)
    }

    /// The category list, only while the state is `Success`.
    pub fn data(&self) -> Option<&Arc<CategoryList>> {
        match self {
            FetchState::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchState::Error(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Read model handed to UI consumers. `data` is only ever present when
/// `status` is `Success`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct CategorySnapshot {
    pub status: FetchStatus,
    pub data: Option<CategoryList>,
    pub error_reason: Option<String>,
    /// A fetch is running, including a background refresh behind `Success`.
    pub is_fetching: bool,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CategorySnapshot {
    pub fn idle() -> Self {
        Self::from_state(&FetchState::Idle, false, None)
    }

    pub fn from_state(state: &FetchState, is_fetching: bool, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: state.status(),
            data: state.data().map(|data| data.as_ref().clone()),
            error_reason: state.error().map(FetchError::reason),
            is_fetching: is_fetching || state.is_loading(),
            updated_at: updated_at.filter(|_| state.data().is_some()),
        }
    }

    /// Age of the data for display, e.g. "just now", "5m ago", "2h ago"
    pub fn age_display(&self) -> Option<String> {
        self.updated_at.map(|at| age_display((Utc::now() - at).num_minutes()))
    }
}

pub(crate) fn age_display(minutes: i64) -> String {
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        let remaining_mins = minutes % 60;
        if remaining_mins >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        format!("{}d ago", minutes / 1440)
    }
}
