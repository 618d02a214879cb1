use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::aggregator::{aggregate, tally};
use crate::batch::{build_artifact, parse_table};
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::fetcher::SourceFetcher;
use crate::notifier::{CallbackNotifier, Notification, Notifier};
use crate::persistence::PersistenceGateway;
use crate::pool::TransformPool;
use crate::state_machine::{Job, JobState, StateMachine, StatusRecord, Terminal};
use crate::storage::{BlobStore, FileRecordStore, LocalBlobStore, RecordStore, StoreError, keys};

/// An accepted job waiting to run, with its resolved callback address.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    pub callback_url: Option<String>,
}

/// Drives jobs from intake to a terminal status and a callback.
///
/// Cheap to clone; every collaborator sits behind an `Arc`. The worker pool
/// is shared with every other job and owned by whoever started it.
#[derive(Clone)]
pub struct BatchOrchestrator {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    fetcher: Arc<SourceFetcher>,
    pool: Arc<TransformPool>,
    persistence: Arc<PersistenceGateway>,
    notifier: Arc<dyn Notifier>,
    default_callback: Option<String>,
    require_callback: bool,
}

impl BatchOrchestrator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        fetcher: SourceFetcher,
        pool: Arc<TransformPool>,
        notifier: Arc<dyn Notifier>,
        default_callback: Option<String>,
    ) -> Self {
        let persistence = Arc::new(PersistenceGateway::new(
            Arc::clone(&records),
            Arc::clone(&blobs),
        ));
        Self {
            blobs,
            records,
            fetcher: Arc::new(fetcher),
            pool,
            persistence,
            notifier,
            default_callback,
            require_callback: true,
        }
    }

    /// Wires the filesystem stores and HTTP clients described by `config`.
    pub fn from_config(config: &BatchConfig, pool: Arc<TransformPool>) -> Result<Self, BatchError> {
        let blobs: Arc<dyn BlobStore> = Arc::new(blob_store(config));
        let records: Arc<dyn RecordStore> = Arc::new(FileRecordStore::new(config.record_dir()));
        let fetcher = SourceFetcher::new(
            Arc::clone(&blobs),
            config.http_timeout(),
            config.fetch_concurrency,
        )?;
        let notifier = CallbackNotifier::new(config.http_timeout())?;

        Ok(Self::new(
            blobs,
            records,
            fetcher,
            pool,
            Arc::new(notifier),
            config.default_callback_url.clone(),
        ))
    }

    /// Allow jobs without any callback address; they finish silently.
    pub fn with_optional_callback(mut self) -> Self {
        self.require_callback = false;
        self
    }

    /// Validates the table and records the job as `processing`.
    ///
    /// Nothing is created when the table is malformed or no callback can be
    /// resolved; the error goes straight back to the caller.
    pub async fn accept(
        &self,
        table: &[u8],
        callback_url: Option<String>,
    ) -> Result<Submission, BatchError> {
        let items = parse_table(table)?;

        let callback_url = callback_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.default_callback.clone());
        if callback_url.is_none() && self.require_callback {
            return Err(BatchError::MissingCallback);
        }

        let job = Job::new(items);
        self.blobs.put(&keys::input_table(&job.id), table).await?;
        self.records
            .create_status(&StatusRecord::processing(&job.id))
            .await?;

        info!(job_id = %job.id, items = job.items.len(), references = job.reference_count(), "Accepted job");
        Ok(Submission { job, callback_url })
    }

    /// Accepts a job and runs it in the background. Returns the job id as
    /// soon as the `processing` record exists.
    pub async fn submit(
        &self,
        table: &[u8],
        callback_url: Option<String>,
    ) -> Result<String, BatchError> {
        let submission = self.accept(table, callback_url).await?;
        let job_id = submission.job.id.clone();
        let callback_url = submission.callback_url.clone();

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(submission).await });

        // A panic inside the pipeline would otherwise leave the job processing.
        let this = self.clone();
        let watched = job_id.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                error!(job_id = %watched, error = %e, "Pipeline task crashed");
                this.fail_crashed(&watched, callback_url, format!("pipeline crashed: {e}"))
                    .await;
            }
        });

        Ok(job_id)
    }

    /// Records a crashed pipeline as failed and tells the callback. Skipped
    /// when the job already reached a terminal state before crashing.
    async fn fail_crashed(&self, job_id: &str, callback_url: Option<String>, message: String) {
        if let Err(e) = self.records.finish(job_id, Terminal::failed(message.clone())).await {
            warn!(job_id = %job_id, error = %e, "Could not mark crashed job failed");
            return;
        }
        if let Some(url) = callback_url {
            self.deliver(&url, job_id, &Notification::Failed { error: message })
                .await;
        }
    }

    /// Runs an accepted job to its terminal state, then notifies.
    ///
    /// Never returns an error: every pipeline failure becomes a `failed`
    /// status with the error's message.
    pub async fn run(&self, submission: Submission) -> StatusRecord {
        let Submission {
            mut job,
            callback_url,
        } = submission;

        let outcome = self.execute(&mut job).await;
        let terminal = match &outcome {
            Ok(_) => Terminal::completed_now(),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Job failed");
                Terminal::failed(e.to_string())
            }
        };

        let record = self.record_terminal(&job.id, terminal).await;
        info!(job_id = %job.id, state = %record.state, "Job finished");

        if let Some(url) = callback_url {
            let notification = self.notification_for(&record, outcome.ok()).await;
            self.deliver(&url, &job.id, &notification).await;
        } else {
            debug!(job_id = %job.id, "No callback address, skipping notification");
        }

        record
    }

    async fn execute(&self, job: &mut Job) -> Result<Vec<u8>, BatchError> {
        self.fetcher.fetch_all(job).await?;

        let locations: Vec<String> = job
            .items
            .iter()
            .flat_map(|item| item.stored.iter().cloned())
            .collect();
        let outputs = self.pool.dispatch(&job.id, locations).await?;

        aggregate(&mut job.items, outputs)?;
        let counts = tally(&job.items);
        info!(
            job_id = %job.id,
            items = counts.items,
            partial_items = counts.partial_items,
            failed_references = counts.failed_references,
            "Transforms aggregated"
        );

        let report = self.persistence.persist_all(job).await;
        if report.failed > 0 {
            warn!(job_id = %job.id, written = report.written, failed = report.failed, "Some item records were not persisted");
        }

        let artifact = build_artifact(&job.items, |key| self.blobs.public_url(key))?;
        self.blobs.put(&keys::artifact(&job.id), &artifact).await?;
        Ok(artifact)
    }

    async fn record_terminal(&self, job_id: &str, terminal: Terminal) -> StatusRecord {
        match self.records.finish(job_id, terminal.clone()).await {
            Ok(record) => record,
            Err(StoreError::AlreadyTerminal(e)) => {
                warn!(job_id = %job_id, state = %e.state, "Job was already terminal, keeping stored state");
                match self.records.status(job_id).await {
                    Ok(Some(record)) => record,
                    _ => unpersisted(job_id, terminal),
                }
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Could not persist terminal state");
                unpersisted(job_id, terminal)
            }
        }
    }

    async fn notification_for(
        &self,
        record: &StatusRecord,
        artifact: Option<Vec<u8>>,
    ) -> Notification {
        match (record.state, artifact) {
            (JobState::Completed, Some(artifact)) => Notification::Completed { artifact },
            (JobState::Completed, None) => match self.artifact(&record.job_id).await {
                Ok(artifact) => Notification::Completed { artifact },
                Err(e) => Notification::Failed {
                    error: format!("artifact unavailable: {e}"),
                },
            },
            (_, _) => Notification::Failed {
                error: record
                    .error
                    .clone()
                    .unwrap_or_else(|| "job did not complete".to_string()),
            },
        }
    }

    async fn deliver(&self, url: &str, job_id: &str, notification: &Notification) {
        match self.notifier.notify(url, job_id, notification).await {
            Ok(()) => info!(job_id = %job_id, callback = %url, "Notified callback"),
            Err(e) => warn!(job_id = %job_id, callback = %url, error = %e, "Callback delivery failed"),
        }
    }

    pub async fn status(&self, job_id: &str) -> Result<StatusRecord, BatchError> {
        self.records
            .status(job_id)
            .await?
            .ok_or_else(|| BatchError::JobNotFound(job_id.to_string()))
    }

    /// The stored output artifact of a completed job.
    pub async fn artifact(&self, job_id: &str) -> Result<Vec<u8>, BatchError> {
        match self.blobs.get(&keys::artifact(job_id)).await {
            Ok(bytes) => Ok(bytes),
            Err(StoreError::NotFound(_) | StoreError::InvalidKey(_)) => {
                Err(BatchError::JobNotFound(job_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn blob_store(config: &BatchConfig) -> LocalBlobStore {
    LocalBlobStore::new(config.blob_dir()).with_public_base_url(config.public_base_url.clone())
}

// In-memory view of a terminal state the store refused to take.
fn unpersisted(job_id: &str, terminal: Terminal) -> StatusRecord {
    let mut record = StatusRecord::processing(job_id);
    let _ = StateMachine::finish(&mut record, terminal);
    record
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use image::ImageFormat;
    use tokio::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::batch::parse_artifact;
    use crate::notifier::NotificationError;
    use crate::persistence::testing::FlakyItemStore;
    use crate::pool::{ImageRecompressor, Transformed, TransformFailure, Transformer, fixtures};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String, Notification)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            callback_url: &str,
            job_id: &str,
            notification: &Notification,
        ) -> Result<(), NotificationError> {
            self.sent.lock().await.push((
                callback_url.to_string(),
                job_id.to_string(),
                notification.clone(),
            ));
            if self.fail {
                return Err(NotificationError::Rejected {
                    status: 503,
                    message: "down".into(),
                });
            }
            Ok(())
        }
    }

    struct PanickingTransformer;

    impl Transformer for PanickingTransformer {
        fn transform(&self, _bytes: &[u8]) -> Result<Transformed, TransformFailure> {
            panic!("segfault in codec");
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        orchestrator: BatchOrchestrator,
        notifier: Arc<RecordingNotifier>,
        blobs: Arc<LocalBlobStore>,
    }

    fn harness_with(transformer: Arc<dyn Transformer>, notifier: RecordingNotifier) -> Harness {
        harness_with_records(transformer, notifier, |root| {
            Arc::new(FileRecordStore::new(root)) as Arc<dyn RecordStore>
        })
    }

    fn harness_with_records(
        transformer: Arc<dyn Transformer>,
        notifier: RecordingNotifier,
        records: impl FnOnce(std::path::PathBuf) -> Arc<dyn RecordStore>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(
            LocalBlobStore::new(dir.path().join("blobs"))
                .with_public_base_url(Some("https://cdn.test".into())),
        );
        let records = records(dir.path().join("records"));
        let fetcher = SourceFetcher::new(blobs.clone(), Duration::from_secs(5), None).unwrap();
        let pool = Arc::new(TransformPool::start(2, transformer, blobs.clone()));
        let notifier = Arc::new(notifier);
        let orchestrator = BatchOrchestrator::new(
            blobs.clone(),
            records,
            fetcher,
            pool,
            notifier.clone(),
            Some("http://hooks.test/default".into()),
        );
        Harness {
            _dir: dir,
            orchestrator,
            notifier,
            blobs,
        }
    }

    fn harness() -> Harness {
        harness_with(
            Arc::new(ImageRecompressor::default()),
            RecordingNotifier::default(),
        )
    }

    async fn serve(server: &MockServer, route: &str, status: u16, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(server)
            .await;
    }

    fn table(rows: &[(&str, String)]) -> Vec<u8> {
        let mut out = String::from("name,images\n");
        for (name, refs) in rows {
            out.push_str(&format!("{name},\"{refs}\"\n"));
        }
        out.into_bytes()
    }

    #[tokio::test]
    async fn successful_job_completes_with_artifact() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", 200, fixtures::encoded(ImageFormat::Jpeg)).await;
        let h = harness();
        let source = format!("{}/a.jpg", server.uri());

        let submission = h
            .orchestrator
            .accept(&table(&[("A", source.clone())]), Some("http://hooks.test/cb".into()))
            .await
            .unwrap();
        let job_id = submission.job.id.clone();
        assert_eq!(
            h.orchestrator.status(&job_id).await.unwrap().state,
            JobState::Processing
        );

        let record = h.orchestrator.run(submission).await;
        assert_eq!(record.state, JobState::Completed);
        assert!(record.completed_at.is_some());
        assert_eq!(h.orchestrator.status(&job_id).await.unwrap(), record);

        let artifact = h.orchestrator.artifact(&job_id).await.unwrap();
        let rows = parse_artifact(&artifact).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "A");
        assert_eq!(rows[0].images, vec![source]);
        assert_eq!(
            rows[0].outputs,
            vec![format!("https://cdn.test/{job_id}/outputs/a.jpg")]
        );

        let sent = h.notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "http://hooks.test/cb");
        assert_eq!(sent[0].1, job_id);
        assert_eq!(sent[0].2, Notification::Completed { artifact });
    }

    #[tokio::test]
    async fn transform_failure_still_completes_with_empty_output() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", 200, b"this is not a jpeg".to_vec()).await;
        let h = harness();

        let submission = h
            .orchestrator
            .accept(&table(&[("A", format!("{}/a.jpg", server.uri()))]), None)
            .await
            .unwrap();
        let job_id = submission.job.id.clone();
        let record = h.orchestrator.run(submission).await;

        assert_eq!(record.state, JobState::Completed);
        let rows = parse_artifact(&h.orchestrator.artifact(&job_id).await.unwrap()).unwrap();
        assert!(rows[0].outputs.is_empty());
        // The default callback was used.
        assert_eq!(h.notifier.sent.lock().await[0].0, "http://hooks.test/default");
    }

    #[tokio::test]
    async fn partial_failure_shortens_only_that_item() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", 200, fixtures::encoded(ImageFormat::Jpeg)).await;
        serve(&server, "/b.png", 200, b"garbage".to_vec()).await;
        serve(&server, "/c.png", 200, fixtures::encoded(ImageFormat::Png)).await;
        let h = harness();
        let base = server.uri();

        let submission = h
            .orchestrator
            .accept(
                &table(&[
                    ("A", format!("{base}/a.jpg,{base}/b.png")),
                    ("B", format!("{base}/c.png")),
                ]),
                None,
            )
            .await
            .unwrap();
        let job_id = submission.job.id.clone();
        assert_eq!(h.orchestrator.run(submission).await.state, JobState::Completed);

        let rows = parse_artifact(&h.orchestrator.artifact(&job_id).await.unwrap()).unwrap();
        assert_eq!(rows[0].images.len(), 2);
        assert_eq!(rows[0].outputs.len(), 1);
        assert_eq!(rows[1].outputs.len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_fails_job_without_artifact() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", 200, fixtures::encoded(ImageFormat::Jpeg)).await;
        serve(&server, "/b.jpg", 500, Vec::new()).await;
        let h = harness();
        let base = server.uri();

        let submission = h
            .orchestrator
            .accept(
                &table(&[("A", format!("{base}/a.jpg")), ("B", format!("{base}/b.jpg"))]),
                None,
            )
            .await
            .unwrap();
        let job_id = submission.job.id.clone();
        let record = h.orchestrator.run(submission).await;

        assert_eq!(record.state, JobState::Failed);
        let message = record.error.clone().unwrap();
        assert!(message.contains("b.jpg"));
        assert!(matches!(
            h.orchestrator.artifact(&job_id).await,
            Err(BatchError::JobNotFound(_))
        ));

        let sent = h.notifier.sent.lock().await;
        assert_eq!(sent[0].2, Notification::Failed { error: message });
    }

    #[tokio::test]
    async fn pool_fault_fails_job() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", 200, fixtures::encoded(ImageFormat::Jpeg)).await;
        let h = harness_with(Arc::new(PanickingTransformer), RecordingNotifier::default());

        let submission = h
            .orchestrator
            .accept(&table(&[("A", format!("{}/a.jpg", server.uri()))]), None)
            .await
            .unwrap();
        let record = h.orchestrator.run(submission).await;

        assert_eq!(record.state, JobState::Failed);
        assert!(record.error.unwrap().starts_with("Worker pool fault"));
    }

    fn flaky_records(
        reject_name: &str,
        panic: bool,
    ) -> impl FnOnce(std::path::PathBuf) -> Arc<dyn RecordStore> {
        let reject_name = reject_name.to_string();
        move |root| {
            Arc::new(FlakyItemStore {
                inner: FileRecordStore::new(root),
                reject_name,
                panic,
            }) as Arc<dyn RecordStore>
        }
    }

    #[tokio::test]
    async fn failed_item_record_still_completes_with_full_artifact() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", 200, fixtures::encoded(ImageFormat::Jpeg)).await;
        serve(&server, "/b.png", 200, fixtures::encoded(ImageFormat::Png)).await;
        let h = harness_with_records(
            Arc::new(ImageRecompressor::default()),
            RecordingNotifier::default(),
            flaky_records("B", false),
        );
        let base = server.uri();

        let submission = h
            .orchestrator
            .accept(
                &table(&[("A", format!("{base}/a.jpg")), ("B", format!("{base}/b.png"))]),
                None,
            )
            .await
            .unwrap();
        let job_id = submission.job.id.clone();
        let record = h.orchestrator.run(submission).await;

        assert_eq!(record.state, JobState::Completed);
        assert_eq!(h.orchestrator.status(&job_id).await.unwrap(), record);

        let artifact = h.orchestrator.artifact(&job_id).await.unwrap();
        let rows = parse_artifact(&artifact).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(
            rows[1].outputs,
            vec![format!("https://cdn.test/{job_id}/outputs/b.png")]
        );
        assert_eq!(
            h.notifier.sent.lock().await[0].2,
            Notification::Completed { artifact }
        );
    }

    #[tokio::test]
    async fn mismatched_container_does_not_share_outputs_across_items() {
        let server = MockServer::start().await;
        // Both sources are PNG, one behind a .jpg name.
        serve(&server, "/a.jpg", 200, fixtures::encoded(ImageFormat::Png)).await;
        serve(&server, "/a.png", 200, fixtures::encoded(ImageFormat::Png)).await;
        let h = harness();
        let base = server.uri();

        let submission = h
            .orchestrator
            .accept(
                &table(&[("A", format!("{base}/a.jpg")), ("B", format!("{base}/a.png"))]),
                None,
            )
            .await
            .unwrap();
        let job_id = submission.job.id.clone();
        assert_eq!(h.orchestrator.run(submission).await.state, JobState::Completed);

        let rows = parse_artifact(&h.orchestrator.artifact(&job_id).await.unwrap()).unwrap();
        assert_eq!(rows[0].outputs.len(), 1);
        assert_eq!(rows[1].outputs.len(), 1);
        assert_ne!(rows[0].outputs, rows[1].outputs);
        assert_eq!(
            rows[0].outputs[0],
            format!("https://cdn.test/{job_id}/outputs/a.jpg")
        );
    }

    #[tokio::test]
    async fn crashed_pipeline_is_failed_and_notified() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", 200, fixtures::encoded(ImageFormat::Jpeg)).await;
        let h = harness_with_records(
            Arc::new(ImageRecompressor::default()),
            RecordingNotifier::default(),
            flaky_records("A", true),
        );

        let job_id = h
            .orchestrator
            .submit(
                &table(&[("A", format!("{}/a.jpg", server.uri()))]),
                Some("http://hooks.test/cb".into()),
            )
            .await
            .unwrap();

        let sent = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let sent = h.notifier.sent.lock().await.clone();
                if !sent.is_empty() {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("crash was never reported");

        let record = h.orchestrator.status(&job_id).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        let error = record.error.unwrap();
        assert!(error.starts_with("pipeline crashed"));

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "http://hooks.test/cb");
        assert_eq!(sent[0].1, job_id);
        assert_eq!(sent[0].2, Notification::Failed { error });
    }

    #[tokio::test]
    async fn notifier_failure_does_not_touch_status() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", 200, fixtures::encoded(ImageFormat::Jpeg)).await;
        let h = harness_with(
            Arc::new(ImageRecompressor::default()),
            RecordingNotifier {
                fail: true,
                ..Default::default()
            },
        );

        let submission = h
            .orchestrator
            .accept(&table(&[("A", format!("{}/a.jpg", server.uri()))]), None)
            .await
            .unwrap();
        let job_id = submission.job.id.clone();
        let record = h.orchestrator.run(submission).await;

        assert_eq!(record.state, JobState::Completed);
        assert_eq!(h.orchestrator.status(&job_id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn malformed_table_creates_nothing() {
        let h = harness();
        let err = h
            .orchestrator
            .accept(b"name\nA\n", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Format(_)));

        let err = h
            .orchestrator
            .accept(b"name,images\n", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Format(_)));

        assert!(!h.blobs.root().exists());
        assert!(h.notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn missing_callback_is_rejected_when_required() {
        let dir = tempfile::tempdir().unwrap();
        let config = BatchConfig {
            storage_dir: dir.path().to_path_buf(),
            ..BatchConfig::default()
        };
        let blobs = Arc::new(LocalBlobStore::new(config.blob_dir()));
        let pool = Arc::new(TransformPool::start(
            1,
            Arc::new(ImageRecompressor::default()),
            blobs,
        ));
        let orchestrator = BatchOrchestrator::from_config(&config, pool).unwrap();

        let table = b"name,images\nA,http://x/a.jpg\n";
        let err = orchestrator.accept(table, None).await.unwrap_err();
        assert!(matches!(err, BatchError::MissingCallback));

        let relaxed = orchestrator.with_optional_callback();
        let submission = relaxed.accept(table, None).await.unwrap();
        assert!(submission.callback_url.is_none());
    }

    #[tokio::test]
    async fn submit_returns_immediately_and_reaches_terminal_state() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", 200, fixtures::encoded(ImageFormat::Png)).await;
        let h = harness();

        let job_id = h
            .orchestrator
            .submit(&table(&[("A", format!("{}/a.png", server.uri()))]), None)
            .await
            .unwrap();

        let record = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let record = h.orchestrator.status(&job_id).await.unwrap();
                if record.state.is_terminal() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job never left processing");

        assert_eq!(record.state, JobState::Completed);
        // Terminal records are stable across queries.
        assert_eq!(h.orchestrator.status(&job_id).await.unwrap(), record);
        assert_eq!(h.orchestrator.status(&job_id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.orchestrator.status("nope").await,
            Err(BatchError::JobNotFound(_))
        ));
        assert!(matches!(
            h.orchestrator.artifact("../nope").await,
            Err(BatchError::JobNotFound(_))
        ));
    }
}
