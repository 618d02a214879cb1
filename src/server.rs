//! HTTP surface: job intake, status query and artifact download.

use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::error::BatchError;
use crate::orchestrator::BatchOrchestrator;
use crate::state_machine::StatusRecord;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, *code),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let body = ErrorBody {
            error: code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            err if err.is_client_error() => {
                let code = match &err {
                    BatchError::MissingCallback => "MISSING_CALLBACK",
                    _ => "FORMAT_ERROR",
                };
                ApiError::BadRequest {
                    code,
                    message: err.to_string(),
                }
            }
            BatchError::JobNotFound(id) => ApiError::NotFound(format!("job {id} not found")),
            other => {
                error!(error = %other, "Request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: String,
}

pub fn router(orchestrator: BatchOrchestrator) -> Router {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{job_id}", get(job_status))
        .route("/jobs/{job_id}/artifact", get(job_artifact))
        .with_state(orchestrator)
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(addr: &str, orchestrator: BatchOrchestrator) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
}

async fn create_job(
    State(orchestrator): State<BatchOrchestrator>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let mut table = None;
    let mut callback_url = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => table = Some(field.bytes().await.map_err(bad_multipart)?),
            Some("callback_url") => {
                callback_url = Some(field.text().await.map_err(bad_multipart)?)
            }
            _ => {}
        }
    }

    let table = table.ok_or_else(|| ApiError::BadRequest {
        code: "MISSING_FILE",
        message: "multipart field `file` is required".to_string(),
    })?;

    let job_id = orchestrator.submit(&table, callback_url).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest {
        code: "BAD_MULTIPART",
        message: err.to_string(),
    }
}

async fn job_status(
    State(orchestrator): State<BatchOrchestrator>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusRecord>, ApiError> {
    Ok(Json(orchestrator.status(&job_id).await?))
}

async fn job_artifact(
    State(orchestrator): State<BatchOrchestrator>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = orchestrator.artifact(&job_id).await?;
    Ok(([(header::CONTENT_TYPE, "text/csv")], bytes).into_response())
}
