use thiserror::Error;

/// Result type for scheduler operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Infrastructure errors for scheduler operations
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("Retry entry not found: {0}")]
    RetryNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Task execution outcome - determines retry behavior
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// Retryable error - will schedule a backoff retry if attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl TaskError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}
