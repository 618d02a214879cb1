use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::StatusRecord;

/// Lifecycle of a job: `processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Processing)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Processing => write!(f, "processing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// The single terminal step a job takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Completed { at: DateTime<Utc> },
    Failed { message: String },
}

impl Terminal {
    pub fn completed_now() -> Self {
        Terminal::Completed { at: Utc::now() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Terminal::Failed {
            message: message.into(),
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            Terminal::Completed { .. } => JobState::Completed,
            Terminal::Failed { .. } => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} is already {state}")]
pub struct TransitionError {
    pub job_id: String,
    pub state: JobState,
}

/// Applies terminal transitions to status records.
pub struct StateMachine;

impl StateMachine {
    /// Moves `record` into the terminal state described by `terminal`.
    ///
    /// Only a `processing` record may transition; a record that already
    /// reached `completed` or `failed` is left untouched and the attempt is
    /// reported as a [`TransitionError`].
    pub fn finish(record: &mut StatusRecord, terminal: Terminal) -> Result<(), TransitionError> {
        if record.state.is_terminal() {
            return Err(TransitionError {
                job_id: record.job_id.clone(),
                state: record.state,
            });
        }

        record.state = terminal.state();
        record.updated_at = Utc::now();
        match terminal {
            Terminal::Completed { at } => {
                record.completed_at = Some(at);
                record.error = None;
            }
            Terminal::Failed { message } => {
                record.completed_at = None;
                record.error = Some(message);
            }
        }
        Ok(())
    }
}
