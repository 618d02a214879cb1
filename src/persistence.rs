//! Per-item durable records. Best effort: one failed write never affects
//! the other items or the job.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::state_machine::{Item, ItemRecord, Job, LocatedRef};
use crate::storage::{BlobStore, RecordStore};

pub struct PersistenceGateway {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
}

/// How many item records were written and how many failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub written: usize,
    pub failed: usize,
}

impl PersistenceGateway {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    /// Builds the durable record for one aggregated item.
    pub fn record_for(&self, job_id: &str, position: usize, item: &Item) -> ItemRecord {
        let inputs = item
            .sources
            .iter()
            .zip(&item.stored)
            .map(|(reference, location)| LocatedRef {
                reference: reference.clone(),
                location: location.clone(),
            })
            .collect();
        let outputs = item
            .output_keys()
            .into_iter()
            .map(|key| LocatedRef {
                reference: self.blobs.public_url(key),
                location: key.to_string(),
            })
            .collect();

        ItemRecord {
            job_id: job_id.to_string(),
            position,
            name: item.name.clone(),
            inputs,
            outputs,
            written_at: Utc::now(),
        }
    }

    /// Writes every item's record concurrently; failures are logged.
    pub async fn persist_all(&self, job: &Job) -> PersistReport {
        let writes = job.items.iter().enumerate().map(|(position, item)| {
            let record = self.record_for(&job.id, position, item);
            async move {
                match self.records.put_item(&record).await {
                    Ok(()) => {
                        debug!(job_id = %record.job_id, item = %record.name, "Persisted item record");
                        true
                    }
                    Err(e) => {
                        warn!(job_id = %record.job_id, item = %record.name, error = %e, "Failed to persist item record");
                        false
                    }
                }
            }
        });

        join_all(writes)
            .await
            .into_iter()
            .fold(PersistReport::default(), |mut report, ok| {
                if ok {
                    report.written += 1;
                } else {
                    report.failed += 1;
                }
                report
            })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FlakyItemStore;
    use super::*;
    use crate::storage::{FileRecordStore, LocalBlobStore};

    fn aggregated(name: &str, outputs: Vec<Option<&str>>) -> Item {
        let n = outputs.len();
        let mut item = Item::new(
            name.into(),
            (0..n).map(|i| format!("http://x/{name}{i}.jpg")).collect(),
        );
        item.stored = (0..n).map(|i| format!("j/sources/{name}{i}.jpg")).collect();
        item.outputs = outputs.into_iter().map(|o| o.map(String::from)).collect();
        item
    }

    #[test]
    fn record_pairs_references_with_locations() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = PersistenceGateway::new(
            Arc::new(FileRecordStore::new(dir.path())),
            Arc::new(
                LocalBlobStore::new(dir.path())
                    .with_public_base_url(Some("https://cdn.test".into())),
            ),
        );
        let item = aggregated("a", vec![Some("j/outputs/a0.jpg"), None]);

        let record = gateway.record_for("j", 3, &item);
        assert_eq!(record.position, 3);
        assert_eq!(record.inputs.len(), 2);
        assert_eq!(record.inputs[1].reference, "http://x/a1.jpg");
        assert_eq!(record.inputs[1].location, "j/sources/a1.jpg");
        assert_eq!(
            record.outputs,
            vec![LocatedRef {
                reference: "https://cdn.test/j/outputs/a0.jpg".into(),
                location: "j/outputs/a0.jpg".into(),
            }]
        );
    }

    #[tokio::test]
    async fn one_failed_write_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(FlakyItemStore {
            inner: FileRecordStore::new(dir.path()),
            reject_name: "b".into(),
            panic: false,
        });
        let gateway =
            PersistenceGateway::new(records.clone(), Arc::new(LocalBlobStore::new(dir.path())));

        let mut job = Job::new(vec![
            aggregated("a", vec![Some("j/outputs/a0.jpg")]),
            aggregated("b", vec![Some("j/outputs/b0.jpg")]),
            aggregated("c", vec![None]),
        ]);
        job.id = "j".into();

        let report = gateway.persist_all(&job).await;
        assert_eq!(report, PersistReport { written: 2, failed: 1 });

        let names: Vec<_> = records
            .inner
            .items("j")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
