//! PostgreSQL job store
//!
//! Durable job/status store shared by every API and worker process.
//! Pending jobs are claimed with `FOR UPDATE SKIP LOCKED`, and a partial
//! unique index keeps at most one active job per video.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::store::JobStore;
use crate::{JobError, ProcessingJob, Result, VideoAsset, VidxError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
    video_id         UUID PRIMARY KEY,
    source_path      TEXT NOT NULL,
    file_name        TEXT NOT NULL,
    size_bytes       BIGINT NOT NULL,
    duration_seconds DOUBLE PRECISION,
    has_audio        BOOLEAN,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS processing_jobs (
    job_id           UUID PRIMARY KEY,
    video_id         UUID NOT NULL REFERENCES videos(video_id) ON DELETE CASCADE,
    status           TEXT NOT NULL
                     CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    progress         REAL NOT NULL DEFAULT 0,
    frames_processed INTEGER NOT NULL DEFAULT 0,
    total_frames     INTEGER NOT NULL DEFAULT 0,
    error_kind       TEXT,
    error_message    TEXT,
    error_retriable  BOOLEAN,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS processing_jobs_one_active
    ON processing_jobs (video_id) WHERE status IN ('pending', 'processing');

CREATE INDEX IF NOT EXISTS processing_jobs_pending
    ON processing_jobs (created_at) WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS processing_jobs_video
    ON processing_jobs (video_id, created_at DESC);
"#;

const JOB_COLUMNS: &str = "job_id, video_id, status, progress, frames_processed, total_frames, \
                           error_kind, error_message, error_retriable, created_at, updated_at";

fn db_error(context: &str, e: sqlx::Error) -> VidxError {
    VidxError::infrastructure("job store", format!("{context}: {e}"))
}

/// PostgreSQL job store
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Create a new store connection
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| db_error("PostgreSQL connection failed", e))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema (idempotent)
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to apply schema", e))?;
        Ok(())
    }
}

/// Video row from database
#[derive(Debug, FromRow)]
struct VideoRow {
    video_id: Uuid,
    source_path: String,
    file_name: String,
    size_bytes: i64,
    duration_seconds: Option<f64>,
    has_audio: Option<bool>,
    created_at: DateTime<Utc>,
}

impl From<VideoRow> for VideoAsset {
    fn from(row: VideoRow) -> Self {
        VideoAsset {
            video_id: row.video_id,
            source_path: PathBuf::from(row.source_path),
            file_name: row.file_name,
            size_bytes: row.size_bytes.max(0) as u64,
            duration_seconds: row.duration_seconds,
            has_audio: row.has_audio,
            created_at: row.created_at,
        }
    }
}

/// Job row from database
#[derive(Debug, FromRow)]
struct JobRow {
    job_id: Uuid,
    video_id: Uuid,
    status: String,
    progress: f32,
    frames_processed: i32,
    total_frames: i32,
    error_kind: Option<String>,
    error_message: Option<String>,
    error_retriable: Option<bool>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for ProcessingJob {
    type Error = VidxError;

    fn try_from(row: JobRow) -> Result<Self> {
        let error = match (row.error_kind, row.error_message) {
            (Some(kind), Some(message)) => Some(JobError {
                kind: kind.parse()?,
                message,
                retriable: row.error_retriable.unwrap_or(false),
            }),
            _ => None,
        };

        Ok(ProcessingJob {
            job_id: row.job_id,
            video_id: row.video_id,
            status: row.status.parse()?,
            progress: row.progress,
            frames_processed: row.frames_processed.max(0) as u32,
            total_frames: row.total_frames.max(0) as u32,
            error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_job(row: Option<JobRow>) -> Result<Option<ProcessingJob>> {
    row.map(ProcessingJob::try_from).transpose()
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_video(&self, video: &VideoAsset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO videos (video_id, source_path, file_name, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (video_id) DO NOTHING
            "#,
        )
        .bind(video.video_id)
        .bind(video.source_path.to_string_lossy().to_string())
        .bind(&video.file_name)
        .bind(video.size_bytes as i64)
        .bind(video.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert video", e))?;

        Ok(())
    }

    async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoAsset>> {
        let row: Option<VideoRow> = sqlx::query_as(
            r#"
            SELECT video_id, source_path, file_name, size_bytes,
                   duration_seconds, has_audio, created_at
            FROM videos
            WHERE video_id = $1
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get video", e))?;

        Ok(row.map(VideoAsset::from))
    }

    async fn record_media_info(
        &self,
        video_id: Uuid,
        duration: f64,
        has_audio: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE videos SET
                duration_seconds = COALESCE(duration_seconds, $2),
                has_audio = COALESCE(has_audio, $3)
            WHERE video_id = $1
            "#,
        )
        .bind(video_id)
        .bind(duration)
        .bind(has_audio)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record media info", e))?;

        if result.rows_affected() == 0 {
            return Err(VidxError::NotFound(format!("Video {video_id}")));
        }
        Ok(())
    }

    async fn delete_video(&self, video_id: Uuid) -> Result<bool> {
        // processing_jobs rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM videos WHERE video_id = $1")
            .bind(video_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete video", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_job(&self, video_id: Uuid) -> Result<ProcessingJob> {
        let job = ProcessingJob::new(video_id);

        // The insert can lose to a concurrent submit, and the winner can finish
        // before we read it back; a few rounds settle either race.
        for _ in 0..3 {
            let inserted: Option<JobRow> = sqlx::query_as(&format!(
                r#"
                INSERT INTO processing_jobs (job_id, video_id, status, created_at, updated_at)
                VALUES ($1, $2, 'pending', $3, $3)
                ON CONFLICT DO NOTHING
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(job.job_id)
            .bind(video_id)
            .bind(job.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                let missing_video = matches!(
                    &e,
                    sqlx::Error::Database(db) if db.is_foreign_key_violation()
                );
                if missing_video {
                    VidxError::NotFound(format!("Video {video_id}"))
                } else {
                    db_error("Failed to create job", e)
                }
            })?;

            if let Some(created) = to_job(inserted)? {
                return Ok(created);
            }
            if let Some(active) = self.active_job_for_video(video_id).await? {
                return Ok(active);
            }
        }

        Err(VidxError::Conflict(format!(
            "Could not create a job for video {video_id}"
        )))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get job", e))?;

        to_job(row)
    }

    async fn latest_job_for_video(&self, video_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM processing_jobs
            WHERE video_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get latest job", e))?;

        to_job(row)
    }

    async fn active_job_for_video(&self, video_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM processing_jobs
            WHERE video_id = $1 AND status IN ('pending', 'processing')
            "#
        ))
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get active job", e))?;

        to_job(row)
    }

    async fn claim_next(&self) -> Result<Option<ProcessingJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE processing_jobs
            SET status = 'processing', updated_at = NOW()
            WHERE job_id = (
                SELECT job_id FROM processing_jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim job", e))?;

        to_job(row)
    }

    async fn set_total_frames(&self, job_id: Uuid, total_frames: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs SET total_frames = $2, updated_at = NOW()
            WHERE job_id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(total_frames as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to set total frames", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        progress: f32,
        frames_processed: Option<u32>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs SET
                progress = GREATEST(progress, LEAST(GREATEST($2, 0), 1)),
                frames_processed = GREATEST(frames_processed, COALESCE($3, frames_processed)),
                updated_at = NOW()
            WHERE job_id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(progress)
        .bind(frames_processed.map(|n| n as i32))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update progress", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_job(&self, job_id: Uuid, frames_processed: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs SET
                status = 'completed',
                progress = 1,
                frames_processed = GREATEST(frames_processed, $2),
                updated_at = NOW()
            WHERE job_id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(frames_processed as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to complete job", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_job(&self, job_id: Uuid, error: &JobError) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs SET
                status = 'failed',
                error_kind = $2,
                error_message = $3,
                error_retriable = $4,
                updated_at = NOW()
            WHERE job_id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(error.kind.as_str())
        .bind(&error.message)
        .bind(error.retriable)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fail job", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<Vec<ProcessingJob>> {
        let error = JobError::abandoned();
        // Compared against the database clock so worker clock skew is irrelevant
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE processing_jobs SET
                status = 'failed',
                error_kind = $2,
                error_message = $3,
                error_retriable = $4,
                updated_at = NOW()
            WHERE status = 'processing'
              AND updated_at < NOW() - make_interval(secs => $1)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(older_than.as_secs_f64())
        .bind(error.kind.as_str())
        .bind(&error.message)
        .bind(error.retriable)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to reclaim stale jobs", e))?;

        rows.into_iter().map(ProcessingJob::try_from).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Ping failed", e))?;
        Ok(())
    }
}
