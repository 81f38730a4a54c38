//! Job and video status store
//!
//! The store is the single source of truth for job lifecycle and doubles as
//! the work queue: workers claim pending jobs from it. Every mutation is a
//! guarded read-modify-write, so terminal states never change and progress
//! never decreases no matter how many writers race.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{JobError, JobStatus, ProcessingJob, Result, VideoAsset, VidxError};

/// Persistence for videos and their processing jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a video (no-op if it already exists)
    async fn insert_video(&self, video: &VideoAsset) -> Result<()>;

    /// Get a video by ID
    async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoAsset>>;

    /// Record probed media facts; values already set are kept
    async fn record_media_info(&self, video_id: Uuid, duration: f64, has_audio: bool)
        -> Result<()>;

    /// Remove a video and all of its jobs
    async fn delete_video(&self, video_id: Uuid) -> Result<bool>;

    /// Create a pending job, or return the video's active job if one exists
    async fn create_job(&self, video_id: Uuid) -> Result<ProcessingJob>;

    /// Get a job by ID
    async fn get_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// Most recently created job for a video
    async fn latest_job_for_video(&self, video_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// Pending or processing job for a video
    async fn active_job_for_video(&self, video_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// Atomically move the oldest pending job to processing
    async fn claim_next(&self) -> Result<Option<ProcessingJob>>;

    /// Set the planned frame count (processing jobs only)
    async fn set_total_frames(&self, job_id: Uuid, total_frames: u32) -> Result<bool>;

    /// Raise progress and frame count; returns false if the job is not processing
    async fn update_progress(
        &self,
        job_id: Uuid,
        progress: f32,
        frames_processed: Option<u32>,
    ) -> Result<bool>;

    /// processing -> completed
    async fn complete_job(&self, job_id: Uuid, frames_processed: u32) -> Result<bool>;

    /// pending|processing -> failed
    async fn fail_job(&self, job_id: Uuid, error: &JobError) -> Result<bool>;

    /// Fail processing jobs not updated for `older_than`: their worker died.
    /// Returns the jobs that were failed.
    async fn reclaim_stale(&self, older_than: Duration) -> Result<Vec<ProcessingJob>>;

    /// Liveness check
    async fn ping(&self) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    videos: HashMap<Uuid, VideoAsset>,
    jobs: HashMap<Uuid, ProcessingJob>,
    queue: VecDeque<Uuid>,
}

impl MemoryState {
    fn active_for(&self, video_id: Uuid) -> Option<&ProcessingJob> {
        self.jobs
            .values()
            .find(|j| j.video_id == video_id && j.status.is_active())
    }
}

/// Single-process store for development and tests
#[derive(Default)]
pub struct MemoryJobStore {
    state: RwLock<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_video(&self, video: &VideoAsset) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .videos
            .entry(video.video_id)
            .or_insert_with(|| video.clone());
        Ok(())
    }

    async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoAsset>> {
        Ok(self.state.read().await.videos.get(&video_id).cloned())
    }

    async fn record_media_info(
        &self,
        video_id: Uuid,
        duration: f64,
        has_audio: bool,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let video = state
            .videos
            .get_mut(&video_id)
            .ok_or_else(|| VidxError::NotFound(format!("Video {video_id}")))?;
        video.duration_seconds.get_or_insert(duration);
        video.has_audio.get_or_insert(has_audio);
        Ok(())
    }

    async fn delete_video(&self, video_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state.videos.remove(&video_id).is_some();
        let job_ids: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|j| j.video_id == video_id)
            .map(|j| j.job_id)
            .collect();
        for id in &job_ids {
            state.jobs.remove(id);
        }
        state.queue.retain(|id| !job_ids.contains(id));
        Ok(existed)
    }

    async fn create_job(&self, video_id: Uuid) -> Result<ProcessingJob> {
        let mut state = self.state.write().await;
        if !state.videos.contains_key(&video_id) {
            return Err(VidxError::NotFound(format!("Video {video_id}")));
        }
        if let Some(active) = state.active_for(video_id) {
            return Ok(active.clone());
        }

        let job = ProcessingJob::new(video_id);
        state.queue.push_back(job.job_id);
        state.jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self.state.read().await.jobs.get(&job_id).cloned())
    }

    async fn latest_job_for_video(&self, video_id: Uuid) -> Result<Option<ProcessingJob>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.video_id == video_id)
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn active_job_for_video(&self, video_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self.state.read().await.active_for(video_id).cloned())
    }

    async fn claim_next(&self) -> Result<Option<ProcessingJob>> {
        let mut state = self.state.write().await;
        while let Some(job_id) = state.queue.pop_front() {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                if job.status == JobStatus::Pending {
                    job.status = JobStatus::Processing;
                    job.updated_at = Utc::now();
                    return Ok(Some(job.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn set_total_frames(&self, job_id: Uuid, total_frames: u32) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.total_frames = total_frames;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        progress: f32,
        frames_processed: Option<u32>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.progress = job.progress.max(progress.clamp(0.0, 1.0));
                if let Some(frames) = frames_processed {
                    job.frames_processed = job.frames_processed.max(frames);
                }
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_job(&self, job_id: Uuid, frames_processed: u32) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Completed;
                job.progress = 1.0;
                job.frames_processed = job.frames_processed.max(frames_processed);
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_job(&self, job_id: Uuid, error: &JobError) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status.is_active() => {
                job.status = JobStatus::Failed;
                job.error = Some(error.clone());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<Vec<ProcessingJob>> {
        let cutoff = Utc::now() - stale_window(older_than)?;
        let error = JobError::abandoned();
        let mut state = self.state.write().await;
        let mut reclaimed = Vec::new();
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < cutoff {
                job.status = JobStatus::Failed;
                job.error = Some(error.clone());
                job.updated_at = Utc::now();
                reclaimed.push(job.clone());
            }
        }
        Ok(reclaimed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn stale_window(older_than: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(older_than)
        .map_err(|_| VidxError::Validation(format!("Stale window too large: {older_than:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobErrorKind;

    async fn store_with_video() -> (MemoryJobStore, Uuid) {
        let store = MemoryJobStore::new();
        let video = VideoAsset::new(Uuid::new_v4(), "/tmp/v.mp4", "v.mp4", 1024);
        let id = video.video_id;
        store.insert_video(&video).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_create_job_is_idempotent_while_active() {
        let (store, video_id) = store_with_video().await;

        let first = store.create_job(video_id).await.unwrap();
        let second = store.create_job(video_id).await.unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(first.status, JobStatus::Pending);

        store.claim_next().await.unwrap().unwrap();
        let third = store.create_job(video_id).await.unwrap();
        assert_eq!(first.job_id, third.job_id);

        store.complete_job(first.job_id, 10).await.unwrap();
        let fresh = store.create_job(video_id).await.unwrap();
        assert_ne!(first.job_id, fresh.job_id);
    }

    #[tokio::test]
    async fn test_create_job_requires_video() {
        let store = MemoryJobStore::new();
        assert!(matches!(
            store.create_job(Uuid::new_v4()).await,
            Err(VidxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_exclusive() {
        let store = MemoryJobStore::new();
        let mut expected = Vec::new();
        for _ in 0..3 {
            let video = VideoAsset::new(Uuid::new_v4(), "/tmp/v.mp4", "v.mp4", 1);
            store.insert_video(&video).await.unwrap();
            expected.push(store.create_job(video.video_id).await.unwrap().job_id);
        }

        for id in expected {
            let claimed = store.claim_next().await.unwrap().unwrap();
            assert_eq!(claimed.job_id, id);
            assert_eq!(claimed.status, JobStatus::Processing);
        }
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let (store, video_id) = store_with_video().await;
        let job = store.create_job(video_id).await.unwrap();

        // Not claimed yet: refused
        assert!(!store.update_progress(job.job_id, 0.2, None).await.unwrap());

        store.claim_next().await.unwrap();
        assert!(store.update_progress(job.job_id, 0.5, Some(4)).await.unwrap());
        assert!(store.update_progress(job.job_id, 0.3, Some(2)).await.unwrap());

        let current = store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(current.progress, 0.5);
        assert_eq!(current.frames_processed, 4);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let (store, video_id) = store_with_video().await;
        let job = store.create_job(video_id).await.unwrap();
        store.claim_next().await.unwrap();

        assert!(store.fail_job(job.job_id, &JobError::cancelled()).await.unwrap());
        assert!(!store.complete_job(job.job_id, 5).await.unwrap());
        assert!(!store.update_progress(job.job_id, 0.9, None).await.unwrap());
        assert!(!store
            .fail_job(
                job.job_id,
                &JobError {
                    kind: JobErrorKind::Validation,
                    message: "late".into(),
                    retriable: false,
                }
            )
            .await
            .unwrap());

        let current = store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Failed);
        assert_eq!(current.error.unwrap().kind, JobErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_pending_job_is_not_claimed() {
        let (store, video_id) = store_with_video().await;
        let job = store.create_job(video_id).await.unwrap();
        store.fail_job(job.job_id, &JobError::cancelled()).await.unwrap();
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_media_info_is_write_once() {
        let (store, video_id) = store_with_video().await;
        store.record_media_info(video_id, 30.0, true).await.unwrap();
        store.record_media_info(video_id, 99.0, false).await.unwrap();

        let video = store.get_video(video_id).await.unwrap().unwrap();
        assert_eq!(video.duration_seconds, Some(30.0));
        assert_eq!(video.has_audio, Some(true));
    }

    #[tokio::test]
    async fn test_reclaim_stale_fails_abandoned_jobs() {
        let (store, video_id) = store_with_video().await;
        let job = store.create_job(video_id).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        // Freshly claimed: still owned
        let lease = Duration::from_secs(600);
        assert!(store.reclaim_stale(lease).await.unwrap().is_empty());

        // Last heartbeat well past the lease
        store
            .state
            .write()
            .await
            .jobs
            .get_mut(&job.job_id)
            .unwrap()
            .updated_at = Utc::now() - chrono::Duration::seconds(3600);

        let reclaimed = store.reclaim_stale(lease).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].job_id, job.job_id);

        let current = store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Failed);
        let error = current.error.unwrap();
        assert_eq!(error.kind, JobErrorKind::Infrastructure);
        assert!(error.retriable);

        // The video is free for a new job again
        let fresh = store.create_job(video_id).await.unwrap();
        assert_ne!(fresh.job_id, job.job_id);
        assert_eq!(fresh.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_reclaim_stale_leaves_pending_and_finished_jobs() {
        let (store, video_id) = store_with_video().await;
        let done = store.create_job(video_id).await.unwrap();
        store.claim_next().await.unwrap();
        store.complete_job(done.job_id, 3).await.unwrap();
        let pending = store.create_job(video_id).await.unwrap();

        {
            let mut state = store.state.write().await;
            for job in state.jobs.values_mut() {
                job.updated_at = Utc::now() - chrono::Duration::seconds(3600);
            }
        }

        assert!(store
            .reclaim_stale(Duration::from_secs(60))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.get_job(pending.job_id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(
            store.get_job(done.job_id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_delete_video_removes_jobs() {
        let (store, video_id) = store_with_video().await;
        let job = store.create_job(video_id).await.unwrap();

        assert!(store.delete_video(video_id).await.unwrap());
        assert!(store.get_job(job.job_id).await.unwrap().is_none());
        assert!(store.latest_job_for_video(video_id).await.unwrap().is_none());
        assert!(!store.delete_video(video_id).await.unwrap());
    }
}
