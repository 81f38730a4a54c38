//! Job runner
//!
//! Executes one claimed job through the five indexing stages:
//!
//! 1. validation: probe, record media facts, check the embedding space
//! 2. frame extraction: sample frames into a per-job scratch directory
//! 3. visual analysis: embed, thumbnail and index frames in bounded batches
//! 4. audio processing: extract and transcribe speech (degrades on failure)
//! 5. indexing: embed and index transcript segments, then finalize
//!
//! Unit-level failures (one frame, one segment) are counted and skipped.
//! Anything fatal fails the job with a normalized [`JobError`].

use crate::progress::{ProgressTracker, Stage};
use crate::thumbnails::{purge_thumbnails, thumbnail_name};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vidx_ai::{run_bounded, AiGateway, EmbedPurpose};
use vidx_core::{
    AppConfig, Frame, JobError, JobErrorKind, JobStatus, JobStore, MediaInfo, ProcessingJob,
    Result, TranscriptSegment, VidxError,
};
use vidx_media::{planned_frame_count, Decomposer, FrameSequence};
use vidx_vector::IndexManager;

// ============================================================================
// Settings & Reports
// ============================================================================

/// Runner knobs taken from the media, jobs and server config sections
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Seconds between sampled frames
    pub frame_interval: f64,
    /// Frames (or segments) pulled per batch round
    pub batch_size: usize,
    /// Parent of per-job scratch directories (system temp if unset)
    pub temp_dir: Option<PathBuf>,
    pub thumbnails_dir: PathBuf,
    /// Wall-clock limit for one job's stages
    pub job_timeout: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            frame_interval: config.media.frame_interval_secs,
            batch_size: config.media.batch_size,
            temp_dir: config.jobs.temp_dir.clone(),
            thumbnails_dir: config.server.thumbnails_dir.clone(),
            job_timeout: config.jobs.job_timeout(),
        }
    }

    pub fn new(thumbnails_dir: impl Into<PathBuf>) -> Self {
        Self {
            frame_interval: 1.0,
            batch_size: 10,
            temp_dir: None,
            thumbnails_dir: thumbnails_dir.into(),
            job_timeout: Duration::from_secs(3600),
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn with_frame_interval(mut self, seconds: f64) -> Self {
        self.frame_interval = seconds;
        self
    }

    pub fn with_job_timeout(mut self, limit: Duration) -> Self {
        self.job_timeout = limit;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Outcome of one job execution
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub video_id: Uuid,
    pub status: JobStatus,
    pub frames_processed: u32,
    pub frames_failed: u32,
    pub segments_indexed: u32,
    pub segments_failed: u32,
    /// Audio was present but could not be transcribed
    pub audio_degraded: bool,
    pub error: Option<JobError>,
    pub elapsed_ms: u64,
}

impl JobReport {
    fn new(job: &ProcessingJob) -> Self {
        Self {
            job_id: job.job_id,
            video_id: job.video_id,
            status: JobStatus::Processing,
            frames_processed: 0,
            frames_failed: 0,
            segments_indexed: 0,
            segments_failed: 0,
            audio_degraded: false,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub(crate) fn failed(job: &ProcessingJob, error: JobError) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error),
            ..Self::new(job)
        }
    }

    fn indexed(&self) -> u32 {
        self.frames_processed + self.segments_indexed
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(VidxError::Cancelled)
    } else {
        Ok(())
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Runs the indexing stages for claimed jobs
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    decomposer: Arc<dyn Decomposer>,
    gateway: Arc<AiGateway>,
    index: Arc<IndexManager>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        decomposer: Arc<dyn Decomposer>,
        gateway: Arc<AiGateway>,
        index: Arc<IndexManager>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            decomposer,
            gateway,
            index,
            settings,
        }
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Remove a video's vectors and thumbnails
    pub async fn purge_video(&self, video_id: Uuid) -> Result<(u64, usize)> {
        let points = self.index.delete_video(video_id).await?;
        let thumbnails = purge_thumbnails(&self.settings.thumbnails_dir, video_id).await?;
        Ok((points, thumbnails))
    }

    /// Run a claimed job to a terminal state. Never returns an error: every
    /// failure ends up recorded on the job.
    pub async fn execute(
        &self,
        job: &ProcessingJob,
        source: &Path,
        cancel: CancellationToken,
    ) -> JobReport {
        let started = Instant::now();
        let tracker = ProgressTracker::new(self.store.clone(), job.job_id);
        let mut report = JobReport::new(job);

        tracing::info!(
            job_id = %job.job_id,
            video_id = %job.video_id,
            source = %source.display(),
            "Job started"
        );

        // Dropping the stages on expiry kills any ffmpeg child still running
        let outcome = tokio::time::timeout(
            self.settings.job_timeout,
            self.run_stages(job, source, &cancel, &tracker, &mut report),
        )
        .await;

        let error = match outcome {
            Err(_) => {
                let error = JobError {
                    kind: JobErrorKind::Infrastructure,
                    message: format!(
                        "Job exceeded its {}s time limit",
                        self.settings.job_timeout.as_secs()
                    ),
                    retriable: true,
                };
                tracing::error!(
                    job_id = %job.job_id,
                    limit_secs = self.settings.job_timeout.as_secs(),
                    frames_processed = report.frames_processed,
                    "Job timed out"
                );
                self.record_failure(job, &error).await;
                Some(error)
            }
            Ok(Err(e)) if cancel.is_cancelled() || matches!(e, VidxError::Cancelled) => {
                self.abandon(job).await;
                Some(JobError::cancelled())
            }
            Ok(Err(e)) => {
                tracing::error!(
                    job_id = %job.job_id,
                    stage_error = %e,
                    kind = e.job_error_kind().as_str(),
                    "Job failed"
                );
                let error = JobError::from(&e);
                self.record_failure(job, &error).await;
                Some(error)
            }
            Ok(Ok(())) if report.indexed() == 0 => {
                let error = JobError {
                    kind: JobErrorKind::TransientProvider,
                    message: "No frame or transcript segment could be indexed".to_string(),
                    retriable: true,
                };
                tracing::error!(
                    job_id = %job.job_id,
                    frames_failed = report.frames_failed,
                    "Nothing indexed"
                );
                self.record_failure(job, &error).await;
                Some(error)
            }
            Ok(Ok(())) => match self
                .store
                .complete_job(job.job_id, report.frames_processed)
                .await
            {
                Ok(true) => None,
                // Refused: the job was cancelled after the last checkpoint
                Ok(false) => {
                    self.abandon(job).await;
                    Some(JobError::cancelled())
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, error = %e, "Failed to finalize job");
                    Some(JobError::from(&e))
                }
            },
        };

        report.status = if error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        report.error = error;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            job_id = %job.job_id,
            status = %report.status,
            frames_processed = report.frames_processed,
            frames_failed = report.frames_failed,
            segments_indexed = report.segments_indexed,
            audio_degraded = report.audio_degraded,
            elapsed_ms = report.elapsed_ms,
            "Job finished"
        );
        report
    }

    async fn record_failure(&self, job: &ProcessingJob, error: &JobError) {
        if let Err(e) = self.store.fail_job(job.job_id, error).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to record job failure");
        }
    }

    /// Cancellation path: make sure the job is marked and nothing it wrote
    /// survives. In-flight calls have drained by the time this runs.
    async fn abandon(&self, job: &ProcessingJob) {
        self.record_failure(job, &JobError::cancelled()).await;
        match self.purge_video(job.video_id).await {
            Ok((points, thumbnails)) => tracing::info!(
                job_id = %job.job_id,
                points,
                thumbnails,
                "Job cancelled, partial output purged"
            ),
            Err(e) => tracing::error!(
                job_id = %job.job_id,
                error = %e,
                "Job cancelled, purge failed"
            ),
        }
    }

    async fn run_stages(
        &self,
        job: &ProcessingJob,
        source: &Path,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
        report: &mut JobReport,
    ) -> Result<()> {
        let video_id = job.video_id;

        tracker.enter(Stage::Validation).await?;
        let info = self.decomposer.probe(source).await?;
        self.store
            .record_media_info(video_id, info.duration_seconds, info.has_audio)
            .await?;
        let total_frames =
            planned_frame_count(info.duration_seconds, self.settings.frame_interval);
        if !self.store.set_total_frames(job.job_id, total_frames).await? {
            return Err(VidxError::Cancelled);
        }
        let dimension = self.gateway.verify_dimension().await?;
        self.index.ensure_collection(video_id, dimension).await?;
        tracker.finish(Stage::Validation).await?;
        checkpoint(cancel)?;

        let work_dir = self.work_dir(job.job_id).await?;
        tracker.enter(Stage::FrameExtraction).await?;
        let mut frames = self
            .extract_frames(source, &info, work_dir.path(), cancel, tracker)
            .await?;
        tracker.finish(Stage::FrameExtraction).await?;
        checkpoint(cancel)?;

        tracker.enter(Stage::VisualAnalysis).await?;
        self.analyze_frames(video_id, &mut frames, cancel, tracker, report)
            .await?;
        tracker.finish(Stage::VisualAnalysis).await?;
        checkpoint(cancel)?;

        tracker.enter(Stage::AudioProcessing).await?;
        let segments = if info.has_audio {
            self.transcribe(video_id, source, &info, work_dir.path(), report)
                .await
        } else {
            tracing::info!(video_id = %video_id, "No audio stream, visual-only index");
            Vec::new()
        };
        tracker.finish(Stage::AudioProcessing).await?;
        checkpoint(cancel)?;

        tracker.enter(Stage::Indexing).await?;
        self.index_segments(video_id, segments, cancel, tracker, report)
            .await
    }

    async fn work_dir(&self, job_id: Uuid) -> Result<TempDir> {
        let parent = self
            .settings
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let scratch_error =
            |e: std::io::Error| VidxError::infrastructure("scratch storage", e.to_string());

        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(scratch_error)?;
        tokio::fs::create_dir_all(&self.settings.thumbnails_dir)
            .await
            .map_err(scratch_error)?;
        tempfile::Builder::new()
            .prefix(&format!("vidx-{job_id}-"))
            .tempdir_in(&parent)
            .map_err(scratch_error)
    }

    /// Frame extraction with live progress forwarded from the decomposer
    async fn extract_frames(
        &self,
        source: &Path,
        info: &MediaInfo,
        out_dir: &Path,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
    ) -> Result<FrameSequence> {
        let (tx, mut rx) = watch::channel(0.0f32);
        let forwarder = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let fraction = *rx.borrow_and_update();
                    if tracker
                        .report(Stage::FrameExtraction, fraction, None)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        // Dropping the extraction future kills ffmpeg
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(VidxError::Cancelled),
            frames = self.decomposer.extract_frames(
                source,
                info,
                self.settings.frame_interval,
                out_dir,
                Some(tx),
            ) => frames,
        };
        let _ = forwarder.await;

        let frames = result?;
        tracing::info!(frames = frames.total(), dir = %out_dir.display(), "Frames extracted");
        Ok(frames)
    }

    async fn analyze_frames(
        &self,
        video_id: Uuid,
        frames: &mut FrameSequence,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
        report: &mut JobReport,
    ) -> Result<()> {
        let total = frames.total().max(1);
        let limit = self.gateway.max_concurrency();
        let batch_size = self.settings.batch_size.max(1);
        let mut attempted = 0u32;

        loop {
            checkpoint(cancel)?;
            let batch = frames.next_batch(batch_size);
            if batch.is_empty() {
                break;
            }
            attempted += batch.len() as u32;

            let results =
                run_bounded(batch, limit, move |frame| self.process_frame(video_id, frame)).await;
            for result in results {
                match result {
                    Ok(()) => report.frames_processed += 1,
                    Err(e) if e.is_fatal_for_job() => return Err(e),
                    Err(_) => report.frames_failed += 1,
                }
            }

            tracker
                .report(
                    Stage::VisualAnalysis,
                    attempted as f32 / total as f32,
                    Some(report.frames_processed),
                )
                .await?;
        }

        if report.frames_failed > 0 {
            tracing::warn!(
                video_id = %video_id,
                lost = report.frames_failed,
                indexed = report.frames_processed,
                "Some frames were skipped"
            );
        }
        Ok(())
    }

    /// Embed, thumbnail and index one frame
    async fn process_frame(&self, video_id: Uuid, frame: Frame) -> Result<()> {
        let visual = match self.gateway.embed_frame(&frame).await {
            Ok(visual) => visual,
            Err(e) => {
                tracing::warn!(
                    video_id = %video_id,
                    frame = frame.index,
                    timestamp = frame.timestamp,
                    error = %e,
                    "Frame analysis failed"
                );
                return Err(e);
            }
        };

        let name = thumbnail_name(video_id, frame.timestamp);
        let dest = self.settings.thumbnails_dir.join(&name);
        let thumbnail = match self.decomposer.thumbnail(&frame, &dest).await {
            Ok(()) => Some(name),
            Err(e) => {
                tracing::warn!(frame = frame.index, error = %e, "Thumbnail skipped");
                None
            }
        };

        self.index
            .index_frame(
                video_id,
                frame.timestamp,
                visual.embedding,
                thumbnail,
                visual.description,
            )
            .await?;

        let _ = tokio::fs::remove_file(&frame.image_path).await;
        Ok(())
    }

    /// Speech track to transcript. Any failure leaves the job visual-only.
    async fn transcribe(
        &self,
        video_id: Uuid,
        source: &Path,
        info: &MediaInfo,
        out_dir: &Path,
        report: &mut JobReport,
    ) -> Vec<TranscriptSegment> {
        if !self.gateway.can_transcribe() {
            tracing::info!(video_id = %video_id, "No transcription provider, skipping audio");
            return Vec::new();
        }

        let track = match self.decomposer.extract_audio(source, info, out_dir).await {
            Ok(Some(track)) => track,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(video_id = %video_id, error = %e, "Audio extraction failed");
                report.audio_degraded = true;
                return Vec::new();
            }
        };

        match self.gateway.transcribe(&track.path).await {
            Ok(segments) => {
                tracing::info!(video_id = %video_id, segments = segments.len(), "Transcribed");
                segments
            }
            Err(e) => {
                tracing::warn!(video_id = %video_id, error = %e, "Transcription failed");
                report.audio_degraded = true;
                Vec::new()
            }
        }
    }

    async fn index_segments(
        &self,
        video_id: Uuid,
        segments: Vec<TranscriptSegment>,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
        report: &mut JobReport,
    ) -> Result<()> {
        let segments: Vec<TranscriptSegment> = segments
            .into_iter()
            .filter(|segment| match segment.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping invalid transcript segment");
                    report.segments_failed += 1;
                    false
                }
            })
            .collect();

        let total = segments.len().max(1);
        let limit = self.gateway.max_concurrency();
        let batch_size = self.settings.batch_size.max(1);
        let mut remaining = segments.into_iter();
        let mut attempted = 0usize;

        loop {
            checkpoint(cancel)?;
            let batch: Vec<TranscriptSegment> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            attempted += batch.len();

            let results = run_bounded(batch, limit, move |segment| {
                self.index_segment(video_id, segment)
            })
            .await;
            for result in results {
                match result {
                    Ok(()) => report.segments_indexed += 1,
                    Err(e) if e.is_fatal_for_job() => return Err(e),
                    Err(e) => {
                        tracing::warn!(video_id = %video_id, error = %e, "Segment skipped");
                        report.segments_failed += 1;
                    }
                }
            }

            tracker
                .report(Stage::Indexing, attempted as f32 / total as f32, None)
                .await?;
        }
        Ok(())
    }

    async fn index_segment(&self, video_id: Uuid, segment: TranscriptSegment) -> Result<()> {
        let embedding = self
            .gateway
            .embed_text(&segment.text, EmbedPurpose::Passage)
            .await?;
        self.index
            .index_transcript(video_id, &segment, embedding)
            .await?;
        Ok(())
    }
}
