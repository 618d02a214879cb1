use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::{StoreError, validate_key};
use crate::state_machine::{ItemRecord, StateMachine, StatusRecord, Terminal};

/// Durable store for status records and per-item records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes the initial record. Fails if one already exists for the job.
    async fn create_status(&self, record: &StatusRecord) -> Result<(), StoreError>;

    async fn status(&self, job_id: &str) -> Result<Option<StatusRecord>, StoreError>;

    /// Compare-and-set from `processing` to a terminal state.
    ///
    /// Returns the updated record, or [`StoreError::AlreadyTerminal`] when
    /// the job already left `processing`; the stored record is unchanged in
    /// that case.
    async fn finish(&self, job_id: &str, terminal: Terminal) -> Result<StatusRecord, StoreError>;

    async fn put_item(&self, record: &ItemRecord) -> Result<(), StoreError>;
}

/// JSON documents on disk, one file per record.
///
/// Layout under `root`: `status/{job_id}.json` and
/// `items/{job_id}/{position}.json`. Status writes for one job go through
/// that job's lock, so the terminal compare-and-set is atomic within the
/// process while other jobs proceed independently.
pub struct FileRecordStore {
    root: PathBuf,
    status_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            status_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.status_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(job_id.to_string()).or_default())
    }

    // Drops lock entries nobody holds any more.
    fn release_job_lock(&self, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.status_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    async fn create_unlocked(&self, path: &Path, record: &StatusRecord) -> Result<(), StoreError> {
        if tokio::fs::try_exists(path).await? {
            return Err(StoreError::AlreadyExists(record.job_id.clone()));
        }
        write_json(path, record).await
    }

    async fn finish_unlocked(
        &self,
        path: &Path,
        job_id: &str,
        terminal: Terminal,
    ) -> Result<StatusRecord, StoreError> {
        let mut record: StatusRecord = read_json(path)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        StateMachine::finish(&mut record, terminal)?;
        write_json(path, &record).await?;
        Ok(record)
    }

    fn status_path(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        validate_key(job_id).map_err(|_| StoreError::NotFound(job_id.to_string()))?;
        if job_id.contains('/') {
            return Err(StoreError::NotFound(job_id.to_string()));
        }
        Ok(self.root.join("status").join(format!("{job_id}.json")))
    }

    fn item_path(&self, record: &ItemRecord) -> Result<PathBuf, StoreError> {
        validate_key(&record.job_id)?;
        Ok(self
            .root
            .join("items")
            .join(&record.job_id)
            .join(format!("{}.json", record.position)))
    }

    /// Reads every persisted item record for a job, in table order.
    pub async fn items(&self, job_id: &str) -> Result<Vec<ItemRecord>, StoreError> {
        validate_key(job_id)?;
        let dir = self.root.join("items").join(job_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            if let Some(record) = read_json::<ItemRecord>(&path).await? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.position);
        Ok(records)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// Write to a sibling temp file and rename so readers never see a torn document.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn create_status(&self, record: &StatusRecord) -> Result<(), StoreError> {
        let path = self.status_path(&record.job_id)?;
        let lock = self.job_lock(&record.job_id);
        let result = {
            let _guard = lock.lock().await;
            self.create_unlocked(&path, record).await
        };
        self.release_job_lock(lock);
        result
    }

    async fn status(&self, job_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        let path = match self.status_path(job_id) {
            Ok(path) => path,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        read_json(&path).await
    }

    async fn finish(&self, job_id: &str, terminal: Terminal) -> Result<StatusRecord, StoreError> {
        let path = self.status_path(job_id)?;
        let lock = self.job_lock(job_id);
        let result = {
            let _guard = lock.lock().await;
            self.finish_unlocked(&path, job_id, terminal).await
        };
        self.release_job_lock(lock);
        result
    }

    async fn put_item(&self, record: &ItemRecord) -> Result<(), StoreError> {
        let path = self.item_path(record)?;
        write_json(&path, record).await
    }
}
