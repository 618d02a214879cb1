use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::BatchError;

/// Output of one dispatch: an entry per input location, in input order.
/// `None` marks a blob whose transform failed.
pub type DispatchOutput = Vec<Option<String>>;

/// The pool could not finish a dispatch. Fails the whole job, unlike a
/// per-blob [`TransformFailure`](super::TransformFailure).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PoolFault(pub String);

impl PoolFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<PoolFault> for BatchError {
    fn from(fault: PoolFault) -> Self {
        BatchError::PoolFault(fault.0)
    }
}

/// A self-contained dispatch envelope sent from a job to the pool.
#[derive(Debug)]
pub struct PoolRequest {
    pub job_id: String,
    pub locations: Vec<String>,
    pub reply: oneshot::Sender<Result<DispatchOutput, PoolFault>>,
}

impl PoolRequest {
    pub fn new(
        job_id: impl Into<String>,
        locations: Vec<String>,
    ) -> (Self, oneshot::Receiver<Result<DispatchOutput, PoolFault>>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                job_id: job_id.into(),
                locations,
                reply,
            },
            rx,
        )
    }
}

/// Extracts the message carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
