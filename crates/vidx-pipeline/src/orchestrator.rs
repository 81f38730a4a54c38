//! Job orchestrator
//!
//! Front door for job lifecycle: submission, status, cancellation, deletion,
//! and the worker pool that drains the store's pending queue.

use crate::cancel::CancelRegistry;
use crate::runner::{JobReport, JobRunner};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vidx_core::{JobError, JobStore, ProcessingJob, Result, VideoAsset, VidxError};

/// Result of a cancellation request
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(ProcessingJob),
    NotFound,
    /// Already completed or failed; nothing changed
    AlreadyTerminal(ProcessingJob),
}

/// What `delete_video` removed
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub video_id: Uuid,
    pub points_deleted: u64,
    pub thumbnails_deleted: usize,
    pub file_deleted: bool,
    pub job_cancelled: bool,
}

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(7200);

/// Coordinates jobs between the API, the store and the workers
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    runner: JobRunner,
    cancels: CancelRegistry,
    wake: Notify,
    stale_after: Duration,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStore>, runner: JobRunner) -> Self {
        Self {
            store,
            runner,
            cancels: CancelRegistry::new(),
            wake: Notify::new(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// How long a processing job may go without an update before it is
    /// considered abandoned by a dead worker
    pub fn with_stale_after(mut self, lease: Duration) -> Self {
        self.stale_after = lease;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Register the video if new and queue a job for it.
    ///
    /// A video with a pending or processing job gets that job back.
    pub async fn submit(&self, video: VideoAsset) -> Result<ProcessingJob> {
        self.store.insert_video(&video).await?;
        let job = self.store.create_job(video.video_id).await?;
        self.wake.notify_one();

        tracing::info!(
            job_id = %job.job_id,
            video_id = %video.video_id,
            status = %job.status,
            "Job submitted"
        );
        Ok(job)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<ProcessingJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| VidxError::NotFound(format!("Job {job_id}")))
    }

    /// Latest job of a video
    pub async fn status_for_video(&self, video_id: Uuid) -> Result<ProcessingJob> {
        self.store
            .latest_job_for_video(video_id)
            .await?
            .ok_or_else(|| VidxError::NotFound(format!("Job for video {video_id}")))
    }

    /// Cancel a pending or processing job and purge what it indexed
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelOutcome> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(CancelOutcome::NotFound);
        };
        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(job));
        }

        if !self.store.fail_job(job_id, &JobError::cancelled()).await? {
            // Finished between the read and the write
            let current = self.store.get_job(job_id).await?.unwrap_or(job);
            return Ok(CancelOutcome::AlreadyTerminal(current));
        }

        let running_here = self.cancels.cancel(job_id);
        // A local runner purges again once its in-flight calls drain
        if let Err(e) = self.runner.purge_video(job.video_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Purge after cancel failed");
        }

        tracing::info!(
            job_id = %job_id,
            video_id = %job.video_id,
            running_here,
            "Job cancelled"
        );
        Ok(CancelOutcome::Cancelled(self.status(job_id).await?))
    }

    /// Remove a video with everything derived from it
    pub async fn delete_video(&self, video_id: Uuid) -> Result<DeleteReport> {
        let video = self
            .store
            .get_video(video_id)
            .await?
            .ok_or_else(|| VidxError::NotFound(format!("Video {video_id}")))?;

        let job_cancelled = match self.store.active_job_for_video(video_id).await? {
            Some(job) => matches!(self.cancel(job.job_id).await?, CancelOutcome::Cancelled(_)),
            None => false,
        };

        let (points_deleted, thumbnails_deleted) = self.runner.purge_video(video_id).await?;
        let file_deleted = match tokio::fs::remove_file(&video.source_path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    path = %video.source_path.display(),
                    error = %e,
                    "Source file not removed"
                );
                false
            }
        };
        self.store.delete_video(video_id).await?;

        tracing::info!(
            video_id = %video_id,
            points_deleted,
            thumbnails_deleted,
            file_deleted,
            job_cancelled,
            "Video deleted"
        );
        Ok(DeleteReport {
            video_id,
            points_deleted,
            thumbnails_deleted,
            file_deleted,
            job_cancelled,
        })
    }

    /// Claim and run the oldest pending job, if any
    pub async fn run_next(&self) -> Result<Option<JobReport>> {
        let Some(job) = self.store.claim_next().await? else {
            return Ok(None);
        };

        let Some(video) = self.store.get_video(job.video_id).await? else {
            let error = JobError::from(&VidxError::NotFound(format!("Video {}", job.video_id)));
            self.store.fail_job(job.job_id, &error).await?;
            return Ok(Some(JobReport::failed(&job, error)));
        };

        let token = self.cancels.register(job.job_id);
        let report = self.runner.execute(&job, &video.source_path, token).await;
        self.cancels.remove(job.job_id);
        Ok(Some(report))
    }

    /// Fail processing jobs whose worker stopped updating them, so their
    /// videos can be submitted again
    pub async fn reclaim_stale(&self) -> Result<usize> {
        let reclaimed = self.store.reclaim_stale(self.stale_after).await?;
        for job in &reclaimed {
            tracing::warn!(
                job_id = %job.job_id,
                video_id = %job.video_id,
                progress = job.progress,
                stale_after_secs = self.stale_after.as_secs(),
                "Reclaimed abandoned job"
            );
        }
        Ok(reclaimed.len())
    }

    /// Whether the job store answers
    pub async fn queue_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    /// Start `count` workers. They stop claiming once `shutdown` fires and
    /// finish the job in hand first.
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|worker| {
                let orchestrator = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    orchestrator
                        .worker_loop(worker, poll_interval, shutdown)
                        .await
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, poll_interval: Duration, shutdown: CancellationToken) {
        tracing::info!(
            worker,
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Worker started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.run_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    // One sweeper per process is enough
                    if worker == 0 {
                        if let Err(e) = self.reclaim_stale().await {
                            tracing::error!(worker, error = %e, "Failed to reclaim stale jobs");
                        }
                    }
                }
                Err(e) => tracing::error!(worker, error = %e, "Failed to claim job"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        tracing::info!(worker, "Worker stopped");
    }
}
