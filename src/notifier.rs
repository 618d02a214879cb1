//! Delivery of the final job outcome to the caller's callback address.
//!
//! Delivery is a best-effort tail call: the status record is already terminal
//! when it runs and nothing here can change it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use thiserror::Error;

use crate::state_machine::JobState;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("callback returned status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("could not attach artifact: {0}")]
    Attachment(String),
}

/// What the callback is told about a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Completed { artifact: Vec<u8> },
    Failed { error: String },
}

impl Notification {
    pub fn state(&self) -> JobState {
        match self {
            Notification::Completed { .. } => JobState::Completed,
            Notification::Failed { .. } => JobState::Failed,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        callback_url: &str,
        job_id: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError>;
}

/// Posts a multipart form: `job_id` and `status` always, `file` (the
/// artifact CSV) when completed, `error` when failed.
pub struct CallbackNotifier {
    client: Client,
}

impl CallbackNotifier {
    pub fn new(timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn form(job_id: &str, notification: &Notification) -> Result<Form, NotificationError> {
        let form = Form::new()
            .text("job_id", job_id.to_string())
            .text("status", notification.state().to_string());

        let form = match notification {
            Notification::Completed { artifact } => {
                let part = Part::bytes(artifact.clone())
                    .file_name(format!("{job_id}.csv"))
                    .mime_str("text/csv")
                    .map_err(|e| NotificationError::Attachment(e.to_string()))?;
                form.part("file", part)
            }
            Notification::Failed { error } => form.text("error", error.clone()),
        };
        Ok(form)
    }
}

#[async_trait]
impl Notifier for CallbackNotifier {
    async fn notify(
        &self,
        callback_url: &str,
        job_id: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(callback_url)
            .multipart(Self::form(job_id, notification)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}
