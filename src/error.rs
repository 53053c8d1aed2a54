use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Worker pool exhausted: {limit} workers already live")]
    PoolExhausted { limit: usize },

    #[error("Render worker creation failed: {0}")]
    ResourceCreationFailed(String),

    #[error("Enrichment failed: {0}")]
    EnrichmentFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CaptureError {
    /// Whether an external caller may reasonably try the same request again.
    /// Captures are attempted once internally; retrying is the caller's call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptureError::NavigationTimeout(_)
                | CaptureError::CaptureFailed(_)
                | CaptureError::PoolExhausted { .. }
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CaptureError::InvalidUrl(_) => ErrorSeverity::Low,
            CaptureError::EnrichmentFailed(_) => ErrorSeverity::Low,
            CaptureError::ConfigurationError(_) => ErrorSeverity::High,
            CaptureError::ResourceCreationFailed(_) => ErrorSeverity::High,
            CaptureError::PoolClosed => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::SerializationError(err.to_string())
    }
}
