use thiserror::Error;

use crate::notifier::NotificationError;
use crate::storage::StoreError;

/// Errors raised by intake and by the asynchronous batch pipeline.
///
/// `Format` and `MissingCallback` are returned synchronously to the caller
/// that submitted the table. Everything else is caught at the pipeline
/// boundary and recorded as a `failed` status.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("No callback address given and no default configured")]
    MissingCallback,

    #[error("Failed to fetch {reference}: {message}")]
    Fetch { reference: String, message: String },

    #[error("Worker pool fault: {0}")]
    PoolFault(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl BatchError {
    pub fn format(message: impl Into<String>) -> Self {
        BatchError::Format(message.into())
    }

    /// Whether the caller that submitted the table is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, BatchError::Format(_) | BatchError::MissingCallback)
    }
}
