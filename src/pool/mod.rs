//! The transform worker pool.
//!
//! A long-lived dispatcher task receives [`PoolRequest`]s on a channel. Each
//! request carries every stored location of one job and gets back one entry
//! per location, in the same order. Transforms run on blocking threads behind
//! a semaphore of `size` permits, shared by all jobs. An output keeps the
//! basename of its source, whatever container the transform detected.
//!
//! Failure handling:
//! - a blob that cannot be read, transformed or written becomes `None`
//! - a panicking transform, a crashed dispatch or a closed pool is a
//!   [`PoolFault`] for that dispatch only; the pool keeps serving

mod protocol;
mod transform;

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::storage::{BlobStore, keys};

pub use protocol::{DispatchOutput, PoolFault, PoolRequest};
pub use transform::{DEFAULT_QUALITY, ImageRecompressor, Transformer};
#[cfg(test)]
pub(crate) use transform::{ImageKind, TransformFailure, Transformed};

#[cfg(test)]
pub(crate) use transform::fixtures;

const QUEUE_DEPTH: usize = 64;

/// Handle to a running pool. Create once per process and share it.
pub struct TransformPool {
    sender: Mutex<Option<mpsc::Sender<PoolRequest>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

struct Workers {
    permits: Arc<Semaphore>,
    transformer: Arc<dyn Transformer>,
    blobs: Arc<dyn BlobStore>,
}

impl TransformPool {
    /// Spawns the dispatcher. Must be called inside a Tokio runtime.
    pub fn start(
        size: usize,
        transformer: Arc<dyn Transformer>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let workers = Arc::new(Workers {
            permits: Arc::new(Semaphore::new(size)),
            transformer,
            blobs,
        });
        let dispatcher = tokio::spawn(run_dispatcher(receiver, workers));
        info!(size, "Transform pool started");

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Sends one job's locations to the pool and waits for the full result.
    pub async fn dispatch(
        &self,
        job_id: &str,
        locations: Vec<String>,
    ) -> Result<DispatchOutput, PoolFault> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| PoolFault::new("transform pool is shut down"))?;

        let count = locations.len();
        let (request, reply) = PoolRequest::new(job_id, locations);
        sender
            .send(request)
            .await
            .map_err(|_| PoolFault::new("transform pool is not running"))?;
        debug!(job_id = %job_id, blobs = count, "Dispatched to transform pool");

        let output = reply
            .await
            .map_err(|_| PoolFault::new("transform pool dropped the dispatch"))??;
        if output.len() != count {
            return Err(PoolFault::new(format!(
                "transform pool returned {} entries for {count} inputs",
                output.len()
            )));
        }
        Ok(output)
    }

    /// Stops accepting dispatches and waits for the dispatcher to drain.
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "Transform pool dispatcher ended abnormally");
        }
        info!("Transform pool stopped");
    }
}

async fn run_dispatcher(mut receiver: mpsc::Receiver<PoolRequest>, workers: Arc<Workers>) {
    let mut in_flight = Vec::new();
    while let Some(request) = receiver.recv().await {
        let workers = Arc::clone(&workers);
        in_flight.retain(|h: &JoinHandle<()>| !h.is_finished());
        in_flight.push(tokio::spawn(async move {
            let PoolRequest {
                job_id,
                locations,
                reply,
            } = request;
            let result = workers.run(&job_id, &locations).await;
            if reply.send(result).is_err() {
                warn!(job_id = %job_id, "Dispatch finished after its job stopped waiting");
            }
        }));
    }
    join_all(in_flight).await;
}

impl Workers {
    async fn run(&self, job_id: &str, locations: &[String]) -> Result<DispatchOutput, PoolFault> {
        let results = join_all(
            locations
                .iter()
                .map(|location| self.transform_one(job_id, location)),
        )
        .await;
        results.into_iter().collect()
    }

    async fn transform_one(
        &self,
        job_id: &str,
        location: &str,
    ) -> Result<Option<String>, PoolFault> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PoolFault::new("transform pool closed"))?;

        let bytes = match self.blobs.get(location).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(job_id = %job_id, location = %location, error = %e, "Could not read source blob");
                return Ok(None);
            }
        };

        let transformer = Arc::clone(&self.transformer);
        let outcome = tokio::task::spawn_blocking(move || transformer.transform(&bytes)).await;

        let transformed = match outcome {
            Ok(Ok(transformed)) => transformed,
            Ok(Err(failure)) => {
                warn!(job_id = %job_id, location = %location, error = %failure, "Transform failed");
                return Ok(None);
            }
            Err(e) if e.is_panic() => {
                let message = protocol::panic_message(&*e.into_panic());
                error!(job_id = %job_id, location = %location, panic_msg = %message, "Transform panicked");
                return Err(PoolFault::new(format!(
                    "transform of {location} panicked: {message}"
                )));
            }
            Err(e) => {
                error!(job_id = %job_id, location = %location, error = %e, "Transform task aborted");
                return Err(PoolFault::new(format!("transform of {location} aborted: {e}")));
            }
        };

        let key = keys::output(job_id, keys::basename(location));
        match self.blobs.put(&key, &transformed.bytes).await {
            Ok(()) => {
                debug!(job_id = %job_id, location = %location, output = %key, kind = %transformed.kind, "Transformed");
                Ok(Some(key))
            }
            Err(e) => {
                warn!(job_id = %job_id, location = %location, error = %e, "Could not store transformed blob");
                Ok(None)
            }
        }
    }
}
