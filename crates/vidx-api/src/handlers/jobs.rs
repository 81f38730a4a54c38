//! Job status and cancellation handlers
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use vidx_core::ProcessingJob;
use vidx_pipeline::CancelOutcome;

/// Polled job state
#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub video_id: Uuid,
    /// pending, processing, completed or failed
    #[schema(example = "processing")]
    pub status: String,
    /// Overall progress in [0, 1], never decreasing
    #[schema(example = 0.45)]
    pub progress: f32,
    #[schema(example = 12)]
    pub frames_processed: u32,
    #[schema(example = 30)]
    pub total_frames: u32,
    /// Normalized failure summary
    pub error: Option<String>,
    /// validation, transient_provider, configuration, infrastructure or cancelled
    pub error_kind: Option<String>,
    pub retriable: Option<bool>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ProcessingJob> for JobStatusResponse {
    fn from(job: ProcessingJob) -> Self {
        Self {
            job_id: job.job_id,
            video_id: job.video_id,
            status: job.status.to_string(),
            progress: job.progress,
            frames_processed: job.frames_processed,
            total_frames: job.total_frames,
            error: job.error.as_ref().map(|e| e.message.clone()),
            error_kind: job.error.as_ref().map(|e| e.kind.as_str().to_string()),
            retriable: job.error.as_ref().map(|e| e.retriable),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// Get job status
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    tag = "jobs",
    params(
        ("id" = Uuid, Path, description = "Job UUID")
    ),
    responses(
        (status = 200, description = "Job status", body = JobStatusResponse),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.increment_requests();

    let job = state.orchestrator().status(job_id).await?;
    Ok(Json(JobStatusResponse::from(job)))
}

/// Cancel a pending or processing job
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/cancel",
    tag = "jobs",
    params(
        ("id" = Uuid, Path, description = "Job UUID")
    ),
    responses(
        (status = 200, description = "Job cancelled", body = JobStatusResponse),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job already finished", body = crate::error::ApiError)
    )
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.increment_requests();

    match state.orchestrator().cancel(job_id).await? {
        CancelOutcome::Cancelled(job) => Ok(Json(JobStatusResponse::from(job))),
        CancelOutcome::NotFound => Err(AppError::NotFound(format!("Job {job_id}"))),
        CancelOutcome::AlreadyTerminal(job) => Err(AppError::Conflict(format!(
            "Job {job_id} is already {}",
            job.status
        ))),
    }
}
