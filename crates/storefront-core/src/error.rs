use thiserror::Error;

/// Failure of a category fetch, as seen by consumers of the fetch policy.
///
/// Cloneable so one failed fetch can be handed to every coalesced waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("No business selected")]
    MissingIdentifier,

    #[error("Failed to load categories: {0}")]
    RemoteFailure(String),
}

impl FetchError {
    /// Human-readable reason suitable for showing to the end user.
    pub fn reason(&self) -> String {
        match self {
            FetchError::MissingIdentifier => self.to_string(),
            FetchError::RemoteFailure(reason) => reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_omits_prefix_for_remote_failures() {
        let err = FetchError::RemoteFailure("Business not found".to_string());
        assert_eq!(err.to_string(), "Failed to load categories: Business not found");
        assert_eq!(err.reason(), "Business not found");
        assert_eq!(FetchError::MissingIdentifier.reason(), "No business selected");
    }
}
