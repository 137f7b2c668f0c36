// ABOUTME: Errors returned by cloud provider capabilities.
// ABOUTME: Distinguishes throttling, which pollers may ride out, from hard failures.

/// Errors from calls against the cloud resource-management API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloudError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("provider error: {0}")]
    Api(String),
}

impl CloudError {
    /// Whether a status poll hitting this error may simply poll again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Throttled(_))
    }
}
