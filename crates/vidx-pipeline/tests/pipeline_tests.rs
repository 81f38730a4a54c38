//! End-to-end job execution against scripted media and fake providers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vidx_ai::testing::{Gate, HashEmbedder, ScriptedDescriber, StaticTranscriber};
use vidx_ai::AiGateway;
use vidx_core::{
    JobErrorKind, JobStatus, JobStore, MemoryJobStore, Modality, ProcessingJob,
    ProviderErrorKind, RetryPolicy, TranscriptSegment, VideoAsset, VidxError,
};
use vidx_media::testing::ScriptedDecomposer;
use vidx_pipeline::{thumbnail_name, CancelOutcome, JobRunner, Orchestrator, RunnerSettings};
use vidx_vector::{IndexManager, MemoryIndex, VectorIndex};

const DIM: usize = 256;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    store: Arc<MemoryJobStore>,
    index: Arc<MemoryIndex>,
    manager: Arc<IndexManager>,
    gateway: Arc<AiGateway>,
    thumbnails: PathBuf,
    dir: TempDir,
}

impl Harness {
    fn new(decomposer: ScriptedDecomposer, gateway: AiGateway) -> Self {
        Self::with_limits(
            decomposer,
            gateway,
            Duration::from_secs(3600),
            Duration::from_secs(7200),
        )
    }

    fn with_limits(
        decomposer: ScriptedDecomposer,
        gateway: AiGateway,
        job_timeout: Duration,
        stale_after: Duration,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let thumbnails = dir.path().join("thumbnails");
        let store = Arc::new(MemoryJobStore::new());
        let index = Arc::new(MemoryIndex::new());
        let manager = Arc::new(IndexManager::new(index.clone(), DIM).with_retry(fast_retry()));
        let gateway = Arc::new(gateway);

        let runner = JobRunner::new(
            store.clone(),
            Arc::new(decomposer),
            gateway.clone(),
            manager.clone(),
            RunnerSettings::new(&thumbnails)
                .with_temp_dir(dir.path().join("scratch"))
                .with_job_timeout(job_timeout),
        );
        let orchestrator =
            Arc::new(Orchestrator::new(store.clone(), runner).with_stale_after(stale_after));

        Self {
            orchestrator,
            store,
            index,
            manager,
            gateway,
            thumbnails,
            dir,
        }
    }

    async fn submit(&self) -> ProcessingJob {
        let video_id = Uuid::new_v4();
        let source = self.dir.path().join(format!("{video_id}_clip.mp4"));
        tokio::fs::write(&source, b"not really a video").await.unwrap();
        let video = VideoAsset::new(video_id, source, "clip.mp4", 18);
        self.orchestrator.submit(video).await.unwrap()
    }

    async fn job(&self, job_id: Uuid) -> ProcessingJob {
        self.orchestrator.status(job_id).await.unwrap()
    }

    fn thumbnail_count(&self, video_id: Uuid) -> usize {
        let prefix = format!("{video_id}_");
        std::fs::read_dir(&self.thumbnails)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
                    .count()
            })
            .unwrap_or(0)
    }
}

fn gateway_with(describer: ScriptedDescriber) -> AiGateway {
    AiGateway::new(Arc::new(HashEmbedder::new(DIM)), DIM)
        .unwrap()
        .with_describer(Arc::new(describer))
        .with_retry(fast_retry())
}

#[tokio::test]
async fn test_lost_frame_is_skipped_and_counted() {
    let decomposer = ScriptedDecomposer::new(30.0).with_scene(|ts| {
        if (ts - 5.0).abs() < 1e-9 {
            "broken frame".to_string()
        } else {
            format!("scene at second {ts}")
        }
    });
    let describer = ScriptedDescriber::new().failing_on("broken");
    let h = Harness::new(decomposer, gateway_with(describer.clone()));
    let job = h.submit().await;

    let report = h.orchestrator.run_next().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.frames_processed, 29);
    assert_eq!(report.frames_failed, 1);

    let job = h.job(job.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_frames, 30);
    assert_eq!(job.frames_processed, 29);
    assert_eq!(job.progress, 1.0);
    assert!(job.error.is_none());

    // The failing frame was attempted once per retry
    assert_eq!(describer.calls(), 29 + 3);
    let stats = h.manager.stats(job.video_id).await.unwrap();
    assert_eq!(stats.visual, 29);
    assert_eq!(h.thumbnail_count(job.video_id), 29);
    assert!(!h.thumbnails.join(thumbnail_name(job.video_id, 5.0)).exists());
}

#[tokio::test]
async fn test_video_without_audio_is_indexed_visual_only() {
    let transcriber = StaticTranscriber::new(vec![TranscriptSegment::new(0.0, 1.0, "hello")]);
    let gateway = gateway_with(ScriptedDescriber::new()).with_transcriber(Arc::new(transcriber));
    let h = Harness::new(ScriptedDecomposer::new(5.0), gateway);
    let job = h.submit().await;

    let report = h.orchestrator.run_next().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert!(!report.audio_degraded);
    assert_eq!(report.segments_indexed, 0);

    let stats = h.manager.stats(job.video_id).await.unwrap();
    assert_eq!((stats.visual, stats.audio), (5, 0));

    let video = h.store.get_video(job.video_id).await.unwrap().unwrap();
    assert_eq!(video.duration_seconds, Some(5.0));
    assert_eq!(video.has_audio, Some(false));
}

#[tokio::test]
async fn test_transcription_failure_degrades_to_visual_only() {
    let gateway = gateway_with(ScriptedDescriber::new())
        .with_transcriber(Arc::new(StaticTranscriber::failing(ProviderErrorKind::Unavailable)));
    let h = Harness::new(ScriptedDecomposer::new(4.0).with_audio(true), gateway);
    let job = h.submit().await;

    let report = h.orchestrator.run_next().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert!(report.audio_degraded);
    assert_eq!(h.manager.stats(job.video_id).await.unwrap().audio, 0);
    assert_eq!(h.job(job.job_id).await.frames_processed, 4);
}

#[tokio::test]
async fn test_red_object_is_found_near_its_timestamp() {
    let decomposer = ScriptedDecomposer::new(60.0)
        .with_audio(true)
        .with_scene(|ts| {
            if (10.0..=12.0).contains(&ts) {
                "a red car parked on the street".to_string()
            } else {
                "an empty room".to_string()
            }
        });
    let transcriber = StaticTranscriber::new(vec![
        TranscriptSegment::new(10.5, 12.0, "look at the red car"),
        TranscriptSegment::new(40.0, 42.0, "hello there"),
    ]);
    let gateway = gateway_with(ScriptedDescriber::new()).with_transcriber(Arc::new(transcriber));
    let h = Harness::new(decomposer, gateway);
    let job = h.submit().await;

    let report = h.orchestrator.run_next().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.segments_indexed, 2);

    let query = h.gateway.embed_query("red car").await.unwrap();
    let hits = h.manager.query(job.video_id, &query, 20).await.unwrap();
    let top = &hits[0];
    assert!((10.0..=12.0).contains(&top.timestamp), "top hit at {}", top.timestamp);

    let best_visual = hits
        .iter()
        .find(|hit| hit.modality == Modality::Visual)
        .unwrap();
    assert!((10.0..=12.0).contains(&best_visual.timestamp));
    let thumbnail = best_visual.thumbnail.as_deref().unwrap();
    assert!(h.thumbnails.join(thumbnail).exists());
    assert_eq!(
        best_visual.text.as_deref(),
        Some("a red car parked on the street")
    );
}

#[tokio::test]
async fn test_dimension_mismatch_fails_before_indexing() {
    let gateway = AiGateway::new(Arc::new(HashEmbedder::new(DIM).emitting(128)), DIM)
        .unwrap()
        .with_describer(Arc::new(ScriptedDescriber::new()))
        .with_retry(fast_retry());
    let h = Harness::new(ScriptedDecomposer::new(10.0), gateway);
    let job = h.submit().await;

    let report = h.orchestrator.run_next().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Failed);

    let job = h.job(job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Configuration);
    assert!(!error.retriable);
    assert!(h.index.collection_dimension(job.video_id).await.unwrap().is_none());
    assert_eq!(h.index.count(job.video_id, None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_media_fails_with_validation_error() {
    let decomposer = ScriptedDecomposer::new(10.0).with_probe_error("No video stream found");
    let h = Harness::new(decomposer, gateway_with(ScriptedDescriber::new()));
    let job = h.submit().await;

    h.orchestrator.run_next().await.unwrap().unwrap();
    let job = h.job(job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Validation);
    assert!(!error.retriable);
    assert_eq!(error.message, "No video stream found");
}

#[tokio::test]
async fn test_nothing_indexed_is_a_retriable_failure() {
    let describer = ScriptedDescriber::new().failing_on("room");
    let h = Harness::new(ScriptedDecomposer::new(3.0), gateway_with(describer));
    let job = h.submit().await;

    let report = h.orchestrator.run_next().await.unwrap().unwrap();
    assert_eq!(report.frames_failed, 3);

    let error = h.job(job.job_id).await.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::TransientProvider);
    assert!(error.retriable);
}

#[tokio::test]
async fn test_unauthorized_provider_fails_the_job() {
    let describer = ScriptedDescriber::new()
        .failing_on("room")
        .failing_with(ProviderErrorKind::Unauthorized);
    let h = Harness::new(ScriptedDecomposer::new(3.0), gateway_with(describer.clone()));
    let job = h.submit().await;

    h.orchestrator.run_next().await.unwrap().unwrap();
    let error = h.job(job.job_id).await.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Configuration);
    // Not retried
    assert!(describer.calls() <= 3);
}

#[tokio::test]
async fn test_cancel_mid_processing_purges_everything() {
    let gate = Arc::new(Gate::default());
    let describer = ScriptedDescriber::new().with_gate(3, gate.clone());
    let h = Harness::new(ScriptedDecomposer::new(30.0), gateway_with(describer));
    let job = h.submit().await;

    let worker = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_next().await })
    };
    gate.reached.notified().await;

    let outcome = h.orchestrator.cancel(job.job_id).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Cancelled(_)));
    gate.resume.notify_one();

    let report = worker.await.unwrap().unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Failed);

    let job = h.job(job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().kind, JobErrorKind::Cancelled);
    assert_eq!(h.index.count(job.video_id, None).await.unwrap(), 0);
    assert_eq!(h.thumbnail_count(job.video_id), 0);
}

#[tokio::test]
async fn test_job_over_its_time_limit_fails_retriably() {
    let gate = Arc::new(Gate::default());
    // The gate is never opened: the third description hangs forever
    let describer = ScriptedDescriber::new().with_gate(2, gate.clone());
    let h = Harness::with_limits(
        ScriptedDecomposer::new(10.0),
        gateway_with(describer),
        Duration::from_millis(200),
        Duration::from_secs(7200),
    );
    let job = h.submit().await;

    let report = tokio::time::timeout(Duration::from_secs(5), h.orchestrator.run_next())
        .await
        .expect("job limit must stop the runner")
        .unwrap()
        .unwrap();
    assert_eq!(report.status, JobStatus::Failed);

    let job = h.job(job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Infrastructure);
    assert!(error.retriable);
}

#[tokio::test]
async fn test_job_of_a_dead_worker_is_reclaimed() {
    let h = Harness::with_limits(
        ScriptedDecomposer::new(2.0),
        gateway_with(ScriptedDescriber::new()),
        Duration::from_secs(3600),
        Duration::from_millis(50),
    );
    let job = h.submit().await;

    // Claimed by a worker that never reports back
    h.store.claim_next().await.unwrap().unwrap();
    assert_eq!(h.orchestrator.reclaim_stale().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(h.orchestrator.reclaim_stale().await.unwrap(), 1);

    let stuck = h.job(job.job_id).await;
    assert_eq!(stuck.status, JobStatus::Failed);
    let error = stuck.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Infrastructure);
    assert!(error.retriable);

    // Resubmitting the video queues a fresh job that runs to completion
    let video = h.store.get_video(job.video_id).await.unwrap().unwrap();
    let again = h.orchestrator.submit(video).await.unwrap();
    assert_ne!(again.job_id, job.job_id);
    let report = h.orchestrator.run_next().await.unwrap().unwrap();
    assert_eq!(report.job_id, again.job_id);
    assert_eq!(report.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_cancel_outcomes() {
    let h = Harness::new(ScriptedDecomposer::new(2.0), gateway_with(ScriptedDescriber::new()));
    let job = h.submit().await;

    assert!(matches!(
        h.orchestrator.cancel(Uuid::new_v4()).await.unwrap(),
        CancelOutcome::NotFound
    ));
    assert!(matches!(
        h.orchestrator.cancel(job.job_id).await.unwrap(),
        CancelOutcome::Cancelled(_)
    ));
    assert!(matches!(
        h.orchestrator.cancel(job.job_id).await.unwrap(),
        CancelOutcome::AlreadyTerminal(_)
    ));
    // The cancelled pending job is never claimed
    assert!(h.orchestrator.run_next().await.unwrap().is_none());

    // A finished job cannot be cancelled
    let second = h.submit().await;
    h.orchestrator.run_next().await.unwrap().unwrap();
    match h.orchestrator.cancel(second.job_id).await.unwrap() {
        CancelOutcome::AlreadyTerminal(job) => assert_eq!(job.status, JobStatus::Completed),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_resubmitting_an_active_video_returns_its_job() {
    let h = Harness::new(ScriptedDecomposer::new(2.0), gateway_with(ScriptedDescriber::new()));
    let job = h.submit().await;
    let video = h.store.get_video(job.video_id).await.unwrap().unwrap();

    let again = h.orchestrator.submit(video.clone()).await.unwrap();
    assert_eq!(again.job_id, job.job_id);

    h.orchestrator.run_next().await.unwrap().unwrap();
    let latest = h.orchestrator.status_for_video(job.video_id).await.unwrap();
    assert_eq!(latest.status, JobStatus::Completed);

    let fresh = h.orchestrator.submit(video).await.unwrap();
    assert_ne!(fresh.job_id, job.job_id);
    assert!(matches!(
        h.orchestrator.status_for_video(Uuid::new_v4()).await,
        Err(VidxError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_video_removes_all_traces() {
    let h = Harness::new(ScriptedDecomposer::new(5.0), gateway_with(ScriptedDescriber::new()));
    let job = h.submit().await;
    h.orchestrator.run_next().await.unwrap().unwrap();
    let source = h
        .store
        .get_video(job.video_id)
        .await
        .unwrap()
        .unwrap()
        .source_path;

    let report = h.orchestrator.delete_video(job.video_id).await.unwrap();
    assert_eq!(report.points_deleted, 5);
    assert_eq!(report.thumbnails_deleted, 5);
    assert!(report.file_deleted);
    assert!(!report.job_cancelled);

    assert!(!source.exists());
    assert!(h.store.get_video(job.video_id).await.unwrap().is_none());
    assert!(h.store.get_job(job.job_id).await.unwrap().is_none());
    assert!(matches!(
        h.orchestrator.delete_video(job.video_id).await,
        Err(VidxError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_observed_progress_never_decreases() {
    let describer = ScriptedDescriber::new().with_delay(Duration::from_millis(2));
    let h = Harness::new(ScriptedDecomposer::new(20.0), gateway_with(describer));
    let job = h.submit().await;

    let poller = {
        let store = h.store.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let current = store.get_job(job.job_id).await.unwrap().unwrap();
                seen.push(current.progress);
                if current.status.is_terminal() {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    h.orchestrator.run_next().await.unwrap().unwrap();
    let seen = poller.await.unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(seen.last().copied(), Some(1.0));
}

#[tokio::test]
async fn test_workers_drain_the_queue() {
    let h = Harness::new(ScriptedDecomposer::new(3.0), gateway_with(ScriptedDescriber::new()));
    let shutdown = CancellationToken::new();
    let workers = h
        .orchestrator
        .spawn_workers(2, Duration::from_millis(10), shutdown.clone());

    let first = h.submit().await;
    let second = h.submit().await;

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let a = h.job(first.job_id).await;
            let b = h.job(second.job_id).await;
            if a.status.is_terminal() && b.status.is_terminal() {
                return (a, b);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(finished.0.status, JobStatus::Completed);
    assert_eq!(finished.1.status, JobStatus::Completed);

    shutdown.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
}
