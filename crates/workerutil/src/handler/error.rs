//! Handler error classification

/// Marker error for handler failures that must not be retried
///
/// Returning this (directly or anywhere in an [`anyhow::Error`] chain) from
/// [`Handler::handle`](crate::Handler::handle) moves the record to the failed
/// state instead of the retryable errored state.
///
/// ```
/// use workerutil::NonRetryableError;
///
/// let err: anyhow::Error = NonRetryableError::new("invalid repository").into();
/// assert!(workerutil::is_non_retryable(&err));
/// assert_eq!(err.to_string(), "invalid repository");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct NonRetryableError {
    message: String,
}

impl NonRetryableError {
    /// Create a non-retryable error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for NonRetryableError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Check whether a handler error carries the non-retryable marker
pub fn is_non_retryable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<NonRetryableError>())
}

/// Terminal outcome of one handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Handler returned `Ok`
    Completed,
    /// Handler returned a retryable error
    Errored(String),
    /// Handler returned a non-retryable error
    Failed(String),
}

impl HandleOutcome {
    /// Classify a handler result
    pub fn classify(result: &anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(err) if is_non_retryable(err) => Self::Failed(err.to_string()),
            Err(err) => Self::Errored(err.to_string()),
        }
    }

    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Errored(_) => "errored",
            Self::Failed(_) => "failed",
        }
    }
}
