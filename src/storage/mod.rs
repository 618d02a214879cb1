//! Storage primitives used by the pipeline.
//!
//! [`BlobStore`] holds raw bytes (uploaded tables, fetched sources,
//! transformed outputs, artifacts) under slash-separated keys.
//! [`RecordStore`] holds the durable status records and per-item records.
//! Both ship with a local-filesystem implementation rooted at the configured
//! storage directory.

mod blob;
mod records;

use thiserror::Error;

use crate::state_machine::TransitionError;

pub use blob::{BlobStore, LocalBlobStore};
pub use records::{FileRecordStore, RecordStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    AlreadyTerminal(#[from] TransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage keys for everything a job writes.
pub mod keys {
    pub fn input_table(job_id: &str) -> String {
        format!("{job_id}/input.csv")
    }

    pub fn source(job_id: &str, basename: &str) -> String {
        format!("{job_id}/sources/{basename}")
    }

    pub fn output(job_id: &str, basename: &str) -> String {
        format!("{job_id}/outputs/{basename}")
    }

    pub fn artifact(job_id: &str) -> String {
        format!("{job_id}/output.csv")
    }

    /// Last path component of a storage key.
    pub fn basename(key: &str) -> &str {
        key.rsplit('/').next().unwrap_or(key)
    }
}

/// Rejects keys that could escape the storage root.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
