use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a business. Never empty; use `Option<BusinessId>` for
/// "no business selected".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BusinessId(String);

impl BusinessId {
    /// Parse an identifier, returning `None` for empty or whitespace-only input.
    pub fn parse(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusinessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BusinessId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BusinessId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value).ok_or_else(|| "business id must not be empty".to_string())
    }
}

impl From<BusinessId> for String {
    fn from(id: BusinessId) -> Self {
        id.0
    }
}
