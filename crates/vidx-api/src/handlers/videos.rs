//! Video upload, lookup and deletion handlers
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use crate::handlers::jobs::JobStatusResponse;
use crate::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use utoipa::ToSchema;
use uuid::Uuid;
use vidx_core::{JobStore, VideoAsset, VidxError};
use vidx_media::{safe_file_name, SourceLimits};
use vidx_pipeline::DeleteReport;

/// Multipart form accepted by the upload endpoint
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadVideoForm {
    /// Video file (mp4, avi, mov, mkv, webm)
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Upload response
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadVideoResponse {
    pub job_id: Uuid,
    pub video_id: Uuid,
    #[schema(example = "pending")]
    pub status: String,
    #[schema(example = "Video uploaded and queued for processing")]
    pub message: String,
}

/// Stored video with its index counts
#[derive(Debug, Serialize, ToSchema)]
pub struct VideoInfoResponse {
    pub video_id: Uuid,
    #[schema(example = "holiday.mp4")]
    pub file_name: String,
    pub size_bytes: u64,
    pub duration_seconds: Option<f64>,
    pub has_audio: Option<bool>,
    pub created_at: String,
    /// Indexed frame descriptions
    pub visual_segments: u64,
    /// Indexed transcript segments
    pub audio_segments: u64,
    pub total_segments: u64,
}

/// Deletion summary
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteVideoResponse {
    pub video_id: Uuid,
    pub points_deleted: u64,
    pub thumbnails_deleted: usize,
    pub file_deleted: bool,
    pub job_cancelled: bool,
}

impl From<DeleteReport> for DeleteVideoResponse {
    fn from(report: DeleteReport) -> Self {
        Self {
            video_id: report.video_id,
            points_deleted: report.points_deleted,
            thumbnails_deleted: report.thumbnails_deleted,
            file_deleted: report.file_deleted,
            job_cancelled: report.job_cancelled,
        }
    }
}

fn storage_error(e: std::io::Error) -> AppError {
    tracing::error!(error = %e, "Upload storage failed");
    VidxError::infrastructure("upload storage", e.to_string()).into()
}

/// Stream one multipart field to disk, enforcing the size cap
async fn save_upload(
    field: &mut axum::extract::multipart::Field<'_>,
    dest: &std::path::Path,
    max_bytes: u64,
) -> Result<u64, AppError> {
    let mut file = tokio::fs::File::create(dest).await.map_err(storage_error)?;
    let mut written: u64 = 0;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                return Err(AppError::BadRequest(format!("Malformed upload: {e}")));
            }
        };
        written += chunk.len() as u64;
        if written > max_bytes {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(AppError::PayloadTooLarge(format!(
                "Video exceeds the {} MB limit",
                max_bytes / (1024 * 1024)
            )));
        }
        file.write_all(&chunk).await.map_err(storage_error)?;
    }

    file.flush().await.map_err(storage_error)?;
    Ok(written)
}

/// Upload a video and queue it for indexing
#[utoipa::path(
    post,
    path = "/api/v1/videos",
    tag = "videos",
    request_body(content = UploadVideoForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Video accepted and queued", body = UploadVideoResponse),
        (status = 400, description = "Missing file or unsupported format", body = crate::error::ApiError),
        (status = 413, description = "Video too large", body = crate::error::ApiError)
    )
)]
pub async fn upload_video(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    state.increment_requests();

    let limits = SourceLimits::from_config(&state.config.media);
    let upload_dir = &state.config.server.upload_dir;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("File name is required".to_string()))?;
        let file_name = safe_file_name(&original);
        if !limits.allows_extension(std::path::Path::new(&file_name)) {
            return Err(AppError::BadRequest(format!(
                "Unsupported format. Accepted: {}",
                limits.supported_formats.join(", ")
            )));
        }

        tokio::fs::create_dir_all(upload_dir)
            .await
            .map_err(storage_error)?;
        let video_id = Uuid::new_v4();
        let dest = upload_dir.join(format!("{video_id}_{file_name}"));
        let size = save_upload(&mut field, &dest, limits.max_size_bytes).await?;
        if size == 0 {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
        }

        let video = VideoAsset::new(video_id, dest.clone(), file_name, size);
        let job = state.orchestrator().submit(video).await?;

        tracing::info!(
            video_id = %video_id,
            job_id = %job.job_id,
            size_bytes = size,
            "Video uploaded"
        );

        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadVideoResponse {
                job_id: job.job_id,
                video_id,
                status: job.status.to_string(),
                message: "Video uploaded and queued for processing".to_string(),
            }),
        ));
    }

    Err(AppError::BadRequest(
        "Multipart field 'file' is required".to_string(),
    ))
}

/// Get a stored video and its index counts
#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}",
    tag = "videos",
    params(
        ("id" = Uuid, Path, description = "Video UUID")
    ),
    responses(
        (status = 200, description = "Video found", body = VideoInfoResponse),
        (status = 404, description = "Video not found", body = crate::error::ApiError)
    )
)]
pub async fn get_video(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.increment_requests();

    let video = state
        .services
        .store
        .get_video(video_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Video {video_id}")))?;
    let stats = state.index().stats(video_id).await?;

    Ok(Json(VideoInfoResponse {
        video_id,
        file_name: video.file_name,
        size_bytes: video.size_bytes,
        duration_seconds: video.duration_seconds,
        has_audio: video.has_audio,
        created_at: video.created_at.to_rfc3339(),
        visual_segments: stats.visual,
        audio_segments: stats.audio,
        total_segments: stats.total,
    }))
}

/// Latest job of a video
#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/status",
    tag = "videos",
    params(
        ("id" = Uuid, Path, description = "Video UUID")
    ),
    responses(
        (status = 200, description = "Job status", body = JobStatusResponse),
        (status = 404, description = "No job for this video", body = crate::error::ApiError)
    )
)]
pub async fn video_status(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.increment_requests();

    let job = state.orchestrator().status_for_video(video_id).await?;
    Ok(Json(JobStatusResponse::from(job)))
}

/// Delete a video with its vectors, thumbnails and source file
#[utoipa::path(
    delete,
    path = "/api/v1/videos/{id}",
    tag = "videos",
    params(
        ("id" = Uuid, Path, description = "Video UUID")
    ),
    responses(
        (status = 200, description = "Video deleted", body = DeleteVideoResponse),
        (status = 404, description = "Video not found", body = crate::error::ApiError)
    )
)]
pub async fn delete_video(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.increment_requests();

    let report = state.orchestrator().delete_video(video_id).await?;
    Ok(Json(DeleteVideoResponse::from(report)))
}
