//! Source acquisition: download every referenced image of a job and store it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::BatchError;
use crate::state_machine::Job;
use crate::storage::{BlobStore, keys};

/// Downloads sources over HTTP into the blob store.
pub struct SourceFetcher {
    client: Client,
    blobs: Arc<dyn BlobStore>,
    per_job_limit: Option<usize>,
}

impl SourceFetcher {
    /// `concurrency` caps in-flight downloads within each job; jobs do not
    /// share the cap. `None` fetches every reference at once.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        timeout: Duration,
        concurrency: Option<usize>,
    ) -> Result<Self, BatchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            blobs,
            per_job_limit: concurrency.map(|n| n.max(1)),
        })
    }

    /// Fetches all references of all items concurrently and fills
    /// `Item::stored` in reference order.
    ///
    /// The first failing reference fails the whole job; downloads still in
    /// flight are dropped.
    pub async fn fetch_all(&self, job: &mut Job) -> Result<(), BatchError> {
        let job_id = job.id.clone();
        let limit = self.per_job_limit.map(Semaphore::new);
        let downloads = job
            .items
            .iter()
            .flat_map(|item| item.sources.iter())
            .map(|reference| self.fetch_one(&job_id, reference, limit.as_ref()));

        let mut stored = try_join_all(downloads).await?.into_iter();
        for item in &mut job.items {
            item.stored = stored.by_ref().take(item.sources.len()).collect();
        }

        info!(job_id = %job_id, references = job.reference_count(), "Fetched all sources");
        Ok(())
    }

    async fn fetch_one(
        &self,
        job_id: &str,
        reference: &str,
        limit: Option<&Semaphore>,
    ) -> Result<String, BatchError> {
        let _permit = match limit {
            Some(limit) => Some(
                limit
                    .acquire()
                    .await
                    .map_err(|e| fetch_error(reference, e))?,
            ),
            None => None,
        };

        debug!(job_id = %job_id, reference = %reference, "Fetching source");
        let response = self
            .client
            .get(reference)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_error(reference, e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_error(reference, e))?;

        let key = keys::source(job_id, &source_basename(reference));
        self.blobs
            .put(&key, &bytes)
            .await
            .map_err(|e| fetch_error(reference, e))?;

        debug!(job_id = %job_id, reference = %reference, key = %key, size = bytes.len(), "Stored source");
        Ok(key)
    }
}

fn fetch_error(reference: &str, err: impl std::fmt::Display) -> BatchError {
    warn!(reference = %reference, error = %err, "Source fetch failed");
    BatchError::Fetch {
        reference: reference.to_string(),
        message: err.to_string(),
    }
}

/// File name used to store a reference. Items sharing a basename within a
/// job share the stored blob.
pub fn source_basename(reference: &str) -> String {
    let last = Url::parse(reference)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "source".to_string());

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.as_str() {
        "." | ".." => "source".to_string(),
        _ => cleaned,
    }
}
