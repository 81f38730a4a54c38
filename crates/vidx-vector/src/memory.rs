//! In-memory vector index
//!
//! Exact cosine search over per-video collections. Used when the service runs
//! without Qdrant and by tests; `set_available(false)` simulates an outage.

use crate::{VectorHit, VectorIndex};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;
use vidx_core::{Modality, Result, VectorRecord, VidxError};

struct Collection {
    dimension: usize,
    records: Vec<VectorRecord>,
}

/// Vector index held in process memory
pub struct MemoryIndex {
    collections: RwLock<HashMap<Uuid, Collection>>,
    available: AtomicBool,
    failing_writes: AtomicU32,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// Toggle a simulated outage; every call fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `count` upserts fail with a transient error
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VidxError::infrastructure("vector store", "in-memory index offline"))
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosine similarity; 0 for zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn collection_dimension(&self, video_id: Uuid) -> Result<Option<usize>> {
        self.check_available()?;
        Ok(self
            .collections
            .read()
            .await
            .get(&video_id)
            .map(|c| c.dimension))
    }

    async fn create_collection(&self, video_id: Uuid, dimension: usize) -> Result<()> {
        self.check_available()?;
        self.collections
            .write()
            .await
            .entry(video_id)
            .or_insert_with(|| Collection {
                dimension,
                records: Vec::new(),
            });
        Ok(())
    }

    async fn upsert(&self, video_id: Uuid, records: &[VectorRecord]) -> Result<()> {
        self.check_available()?;
        let pending_failures = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending_failures.is_ok() {
            return Err(VidxError::infrastructure("vector store", "simulated write failure"));
        }

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(&video_id)
            .ok_or_else(|| VidxError::NotFound(format!("Collection for video {video_id}")))?;

        for record in records {
            if record.embedding.len() != collection.dimension {
                return Err(VidxError::DimensionMismatch {
                    expected: collection.dimension,
                    actual: record.embedding.len(),
                });
            }
        }
        for record in records {
            match collection.records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => collection.records.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn query(&self, video_id: Uuid, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let collection = collections
            .get(&video_id)
            .ok_or_else(|| VidxError::NotFound(format!("Index for video {video_id}")))?;

        let mut hits: Vec<VectorHit> = collection
            .records
            .iter()
            .filter(|r| r.video_id == video_id)
            .map(|r| VectorHit {
                id: r.id,
                score: cosine_similarity(vector, &r.embedding),
                modality: r.modality,
                timestamp: r.timestamp,
                end_time: r.end_time,
                thumbnail: r.thumbnail.clone(),
                text: r.text.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, video_id: Uuid, modality: Option<Modality>) -> Result<u64> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(&video_id)
            .map(|c| {
                c.records
                    .iter()
                    .filter(|r| modality.map_or(true, |m| r.modality == m))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn delete_video(&self, video_id: Uuid) -> Result<u64> {
        self.check_available()?;
        Ok(self
            .collections
            .write()
            .await
            .remove(&video_id)
            .map(|c| c.records.len() as u64)
            .unwrap_or(0))
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }

    fn name(&self) -> &str {
        "memory"
    }
}
