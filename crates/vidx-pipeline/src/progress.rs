//! Stage-weighted progress accounting
//!
//! Each stage owns a slice of [0, 1]. A stage reports a fraction of its own
//! work; the tracker maps it into the slice and only ever moves forward.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use vidx_core::{JobStore, Result, VidxError};

// ============================================================================
// Stages
// ============================================================================

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    FrameExtraction,
    VisualAnalysis,
    AudioProcessing,
    Indexing,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Validation,
        Stage::FrameExtraction,
        Stage::VisualAnalysis,
        Stage::AudioProcessing,
        Stage::Indexing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::FrameExtraction => "frame_extraction",
            Self::VisualAnalysis => "visual_analysis",
            Self::AudioProcessing => "audio_processing",
            Self::Indexing => "indexing",
        }
    }

    /// Cumulative progress once this stage is done
    pub fn ceiling(self) -> f32 {
        match self {
            Self::Validation => 0.1,
            Self::FrameExtraction => 0.3,
            Self::VisualAnalysis => 0.6,
            Self::AudioProcessing => 0.8,
            Self::Indexing => 1.0,
        }
    }

    /// Cumulative progress when this stage starts
    pub fn floor(self) -> f32 {
        match self {
            Self::Validation => 0.0,
            Self::FrameExtraction => Self::Validation.ceiling(),
            Self::VisualAnalysis => Self::FrameExtraction.ceiling(),
            Self::AudioProcessing => Self::VisualAnalysis.ceiling(),
            Self::Indexing => Self::AudioProcessing.ceiling(),
        }
    }

    /// Overall progress for `fraction` of this stage done
    pub fn progress(self, fraction: f32) -> f32 {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.floor() + (self.ceiling() - self.floor()) * fraction
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Writes a job's progress through to the status store.
///
/// Clones share the high-water mark, so a forwarder task and the runner can
/// both report without moving progress backwards.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    reached: Arc<Mutex<f32>>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self {
            store,
            job_id,
            reached: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Highest progress reported so far
    pub fn current(&self) -> f32 {
        match self.reached.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Raise the high-water mark; returns the value to persist
    fn advance(&self, progress: f32) -> f32 {
        let mut reached = match self.reached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *reached = reached.max(progress);
        *reached
    }

    /// Report `fraction` of `stage` and optionally the indexed frame count.
    ///
    /// Fails with [`VidxError::Cancelled`] once the store stops accepting
    /// updates, which happens when the job left the processing state.
    pub async fn report(&self, stage: Stage, fraction: f32, frames: Option<u32>) -> Result<()> {
        let progress = self.advance(stage.progress(fraction));
        let accepted = self
            .store
            .update_progress(self.job_id, progress, frames)
            .await?;
        if !accepted {
            return Err(VidxError::Cancelled);
        }
        tracing::debug!(job_id = %self.job_id, stage = %stage, progress, "Progress");
        Ok(())
    }

    /// Mark the start of a stage. Skipped stages are covered by the jump.
    pub async fn enter(&self, stage: Stage) -> Result<()> {
        tracing::info!(job_id = %self.job_id, stage = %stage, "Stage started");
        self.report(stage, 0.0, None).await
    }

    pub async fn finish(&self, stage: Stage) -> Result<()> {
        self.report(stage, 1.0, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vidx_core::{JobError, MemoryJobStore, VideoAsset};

    #[test]
    fn test_stage_slices_are_contiguous() {
        assert_eq!(Stage::Validation.floor(), 0.0);
        for pair in Stage::ALL.windows(2) {
            assert_eq!(pair[0].ceiling(), pair[1].floor());
        }
        assert_eq!(Stage::Indexing.ceiling(), 1.0);
        assert!((Stage::VisualAnalysis.progress(0.5) - 0.45).abs() < 1e-6);
        assert_eq!(Stage::AudioProcessing.progress(7.0), 0.8);
        assert_eq!(Stage::AudioProcessing.progress(f32::NAN), 0.6);
    }

    async fn processing_job() -> (Arc<MemoryJobStore>, Uuid) {
        let store = Arc::new(MemoryJobStore::new());
        let video = VideoAsset::new(Uuid::new_v4(), "/tmp/v.mp4", "v.mp4", 10);
        store.insert_video(&video).await.unwrap();
        let job = store.create_job(video.video_id).await.unwrap();
        store.claim_next().await.unwrap();
        (store, job.job_id)
    }

    #[tokio::test]
    async fn test_tracker_writes_through_and_never_regresses() {
        let (store, job_id) = processing_job().await;
        let tracker = ProgressTracker::new(store.clone(), job_id);

        tracker.report(Stage::VisualAnalysis, 0.5, Some(5)).await.unwrap();
        tracker.report(Stage::FrameExtraction, 0.2, None).await.unwrap();
        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert!((job.progress - 0.45).abs() < 1e-6);
        assert_eq!(job.frames_processed, 5);
        assert!((tracker.current() - 0.45).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_refused_update_means_cancelled() {
        let (store, job_id) = processing_job().await;
        let tracker = ProgressTracker::new(store.clone(), job_id);
        store.fail_job(job_id, &JobError::cancelled()).await.unwrap();

        let err = tracker.enter(Stage::AudioProcessing).await.unwrap_err();
        assert!(matches!(err, VidxError::Cancelled));
    }

    proptest! {
        #[test]
        fn prop_reports_are_monotone(
            steps in prop::collection::vec((0usize..5, -0.5f32..1.5), 1..40)
        ) {
            let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            let tracker = ProgressTracker::new(store, Uuid::new_v4());
            let mut last = 0.0f32;
            for (stage, fraction) in steps {
                let now = tracker.advance(Stage::ALL[stage].progress(fraction));
                prop_assert!(now >= last);
                prop_assert!((0.0..=1.0).contains(&now));
                last = now;
            }
        }
    }
}
