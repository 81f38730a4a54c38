//! Index manager
//!
//! Validates every write before it reaches the backend, serializes deletion
//! against concurrent writes of the same video, and retries backend calls.
//! Each attempt runs under a deadline; an expired call counts as a failed one.

use crate::{VectorHit, VectorIndex};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;
use vidx_core::{Modality, Result, RetryPolicy, TranscriptSegment, VectorRecord, VidxError};

/// Record counts for one video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub visual: u64,
    pub audio: u64,
    pub total: u64,
}

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Await one backend call; expiry is an infrastructure failure, so the
/// retry policy treats it like any other store outage
async fn deadline<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(VidxError::infrastructure(
            "vector store",
            format!("{operation} exceeded {}s", limit.as_secs_f64()),
        )),
    }
}

/// Front door to a [`VectorIndex`] backend
pub struct IndexManager {
    index: Arc<dyn VectorIndex>,
    dimension: usize,
    retry: RetryPolicy,
    call_timeout: Duration,
    locks: Mutex<HashMap<Uuid, Arc<RwLock<()>>>>,
}

impl IndexManager {
    pub fn new(index: Arc<dyn VectorIndex>, dimension: usize) -> Self {
        Self {
            index,
            dimension,
            retry: RetryPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline for each backend call attempt
    pub fn with_call_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = limit;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend(&self) -> &str {
        self.index.name()
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<RwLock<()>>>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_for(&self, video_id: Uuid) -> Arc<RwLock<()>> {
        self.locks().entry(video_id).or_default().clone()
    }

    /// Drop the video's lock entry unless a writer still holds it
    fn release_lock(&self, video_id: Uuid) {
        let mut locks = self.locks();
        if locks
            .get(&video_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&video_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks().len()
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(VidxError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Make sure the video's collection exists with `dimension`.
    ///
    /// `dimension` is what the active embedding provider actually returns.
    pub async fn ensure_collection(&self, video_id: Uuid, dimension: usize) -> Result<()> {
        self.check_dimension(dimension)?;
        let lock = self.lock_for(video_id);
        let _guard = lock.read().await;

        let index = &self.index;
        let limit = self.call_timeout;
        let existing = self
            .retry
            .run("collection_dimension", move || {
                deadline(
                    limit,
                    "collection_dimension",
                    index.collection_dimension(video_id),
                )
            })
            .await?;

        match existing {
            Some(found) if found != dimension => Err(VidxError::Configuration(format!(
                "Collection for video {video_id} has dimension {found}, embedder returns {dimension}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.retry
                    .run("create_collection", move || {
                        deadline(
                            limit,
                            "create_collection",
                            index.create_collection(video_id, dimension),
                        )
                    })
                    .await
            }
        }
    }

    async fn write(&self, record: VectorRecord) -> Result<Uuid> {
        self.check_dimension(record.embedding.len())?;
        if !record.timestamp.is_finite() || record.timestamp < 0.0 {
            return Err(VidxError::Validation(format!(
                "Invalid timestamp {}",
                record.timestamp
            )));
        }

        let video_id = record.video_id;
        let lock = self.lock_for(video_id);
        let _guard = lock.read().await;

        let index = &self.index;
        let limit = self.call_timeout;
        let records = std::slice::from_ref(&record);
        self.retry
            .run("upsert", move || {
                deadline(limit, "upsert", index.upsert(video_id, records))
            })
            .await?;
        Ok(record.id)
    }

    /// Index one frame vector
    pub async fn index_frame(
        &self,
        video_id: Uuid,
        timestamp: f64,
        embedding: Vec<f32>,
        thumbnail: Option<String>,
        description: Option<String>,
    ) -> Result<Uuid> {
        self.write(VectorRecord::visual(
            video_id,
            timestamp,
            embedding,
            thumbnail,
            description,
        ))
        .await
    }

    /// Index one transcript segment vector
    pub async fn index_transcript(
        &self,
        video_id: Uuid,
        segment: &TranscriptSegment,
        embedding: Vec<f32>,
    ) -> Result<Uuid> {
        segment.validate()?;
        self.write(VectorRecord::audio(video_id, segment, embedding))
            .await
    }

    /// Nearest records of one video
    pub async fn query(&self, video_id: Uuid, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        self.check_dimension(vector.len())?;
        let index = &self.index;
        let call_timeout = self.call_timeout;
        self.retry
            .run("query", move || {
                deadline(call_timeout, "query", index.query(video_id, vector, limit))
            })
            .await
    }

    pub async fn stats(&self, video_id: Uuid) -> Result<IndexStats> {
        let index = &self.index;
        let limit = self.call_timeout;
        let visual = self
            .retry
            .run("count", move || {
                deadline(limit, "count", index.count(video_id, Some(Modality::Visual)))
            })
            .await?;
        let audio = self
            .retry
            .run("count", move || {
                deadline(limit, "count", index.count(video_id, Some(Modality::Audio)))
            })
            .await?;
        Ok(IndexStats {
            visual,
            audio,
            total: visual + audio,
        })
    }

    /// Remove every record of a video. Waits for in-flight writes.
    pub async fn delete_video(&self, video_id: Uuid) -> Result<u64> {
        let lock = self.lock_for(video_id);
        let result = {
            let _guard = lock.write().await;
            let index = &self.index;
            let limit = self.call_timeout;
            self.retry
                .run("delete_video", move || {
                    deadline(limit, "delete_video", index.delete_video(video_id))
                })
                .await
        };
        drop(lock);
        self.release_lock(video_id);

        let deleted = result?;
        tracing::info!(video_id = %video_id, points = deleted, "Purged video vectors");
        Ok(deleted)
    }

    pub async fn health_check(&self) -> bool {
        deadline(self.call_timeout, "health_check", self.index.health_check())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryIndex;
    use async_trait::async_trait;

    fn manager(index: Arc<MemoryIndex>) -> IndexManager {
        IndexManager::new(index, 3)
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)))
    }

    #[tokio::test]
    async fn test_ensure_collection_checks_dimension() {
        let index = Arc::new(MemoryIndex::new());
        let manager = manager(index.clone());
        let video_id = Uuid::new_v4();

        assert!(matches!(
            manager.ensure_collection(video_id, 4).await,
            Err(VidxError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
        assert!(index.collection_dimension(video_id).await.unwrap().is_none());

        manager.ensure_collection(video_id, 3).await.unwrap();
        manager.ensure_collection(video_id, 3).await.unwrap();
        assert_eq!(index.collection_dimension(video_id).await.unwrap(), Some(3));

        // Collection created earlier under a different provider
        let other = Uuid::new_v4();
        index.create_collection(other, 5).await.unwrap();
        assert!(matches!(
            manager.ensure_collection(other, 3).await,
            Err(VidxError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_are_validated_before_insert() {
        let index = Arc::new(MemoryIndex::new());
        let manager = manager(index.clone());
        let video_id = Uuid::new_v4();
        manager.ensure_collection(video_id, 3).await.unwrap();

        assert!(manager
            .index_frame(video_id, 1.0, vec![1.0, 0.0], None, None)
            .await
            .is_err());
        assert!(manager
            .index_frame(video_id, -1.0, vec![1.0, 0.0, 0.0], None, None)
            .await
            .is_err());
        let bad_segment = TranscriptSegment::new(5.0, 4.0, "backwards");
        assert!(manager
            .index_transcript(video_id, &bad_segment, vec![1.0, 0.0, 0.0])
            .await
            .is_err());
        assert_eq!(index.count(video_id, None).await.unwrap(), 0);

        manager
            .index_frame(video_id, 1.0, vec![1.0, 0.0, 0.0], Some("t.jpg".into()), None)
            .await
            .unwrap();
        let segment = TranscriptSegment::new(0.0, 2.0, "hello");
        manager
            .index_transcript(video_id, &segment, vec![0.0, 1.0, 0.0])
            .await
            .unwrap();

        let stats = manager.stats(video_id).await.unwrap();
        assert_eq!(
            stats,
            IndexStats {
                visual: 1,
                audio: 1,
                total: 2
            }
        );
    }

    #[tokio::test]
    async fn test_transient_write_failures_are_retried() {
        let index = Arc::new(MemoryIndex::new());
        let manager = manager(index.clone());
        let video_id = Uuid::new_v4();
        manager.ensure_collection(video_id, 3).await.unwrap();

        index.fail_next_writes(2);
        manager
            .index_frame(video_id, 0.0, vec![1.0, 0.0, 0.0], None, None)
            .await
            .unwrap();

        index.fail_next_writes(3);
        let err = manager
            .index_frame(video_id, 1.0, vec![1.0, 0.0, 0.0], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VidxError::Infrastructure { .. }));
        assert_eq!(index.count(video_id, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_waits_for_writers() {
        let index = Arc::new(MemoryIndex::new());
        let manager = Arc::new(manager(index.clone()));
        let video_id = Uuid::new_v4();
        manager.ensure_collection(video_id, 3).await.unwrap();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .index_frame(video_id, i as f64, vec![1.0, 0.0, 0.0], None, None)
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        assert_eq!(manager.delete_video(video_id).await.unwrap(), 8);
        assert_eq!(manager.stats(video_id).await.unwrap().total, 0);
    }

    /// Backend whose writes and queries never answer
    struct StalledIndex;

    #[async_trait]
    impl VectorIndex for StalledIndex {
        async fn collection_dimension(&self, _video_id: Uuid) -> Result<Option<usize>> {
            Ok(Some(3))
        }

        async fn create_collection(&self, _video_id: Uuid, _dimension: usize) -> Result<()> {
            Ok(())
        }

        async fn upsert(&self, _video_id: Uuid, _records: &[VectorRecord]) -> Result<()> {
            std::future::pending().await
        }

        async fn query(
            &self,
            _video_id: Uuid,
            _vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<VectorHit>> {
            std::future::pending().await
        }

        async fn count(&self, _video_id: Uuid, _modality: Option<Modality>) -> Result<u64> {
            Ok(0)
        }

        async fn delete_video(&self, _video_id: Uuid) -> Result<u64> {
            std::future::pending().await
        }

        async fn health_check(&self) -> Result<()> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_stalled_backend_calls_time_out() {
        let manager = IndexManager::new(Arc::new(StalledIndex), 3)
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)))
            .with_call_timeout(Duration::from_millis(20));
        let video_id = Uuid::new_v4();
        manager.ensure_collection(video_id, 3).await.unwrap();

        let write = tokio::time::timeout(
            Duration::from_secs(5),
            manager.index_frame(video_id, 0.0, vec![1.0, 0.0, 0.0], None, None),
        )
        .await
        .expect("write must give up on its own");
        assert!(matches!(write, Err(VidxError::Infrastructure { .. })));

        let query = tokio::time::timeout(
            Duration::from_secs(5),
            manager.query(video_id, &[1.0, 0.0, 0.0], 5),
        )
        .await
        .expect("query must give up on its own");
        assert!(matches!(query, Err(VidxError::Infrastructure { .. })));

        let delete = tokio::time::timeout(Duration::from_secs(5), manager.delete_video(video_id))
            .await
            .expect("delete must give up on its own");
        assert!(delete.is_err());
        assert_eq!(manager.tracked_locks(), 0);

        assert!(!manager.health_check().await);
    }

    #[tokio::test]
    async fn test_deleted_videos_release_their_locks() {
        let index = Arc::new(MemoryIndex::new());
        let manager = manager(index);

        for _ in 0..50 {
            let video_id = Uuid::new_v4();
            manager.ensure_collection(video_id, 3).await.unwrap();
            manager
                .index_frame(video_id, 0.0, vec![1.0, 0.0, 0.0], None, None)
                .await
                .unwrap();
            manager.delete_video(video_id).await.unwrap();
        }
        // Unknown ids leave nothing behind either
        manager.delete_video(Uuid::new_v4()).await.unwrap();

        assert_eq!(manager.tracked_locks(), 0);
    }
}
