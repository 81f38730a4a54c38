//! vidx Vector - Vector index abstraction
//!
//! One collection per video, cosine distance. Backends:
//! - [`QdrantIndex`]: Qdrant over gRPC
//! - [`MemoryIndex`]: in-process, for single-node use and tests
//!
//! [`IndexManager`] sits in front of a backend and owns dimension checks,
//! per-video locking and retries.
//!
//! Author: hephaex@gmail.com

pub mod manager;
pub mod memory;
pub mod qdrant_store;

pub use manager::{IndexManager, IndexStats};
pub use memory::MemoryIndex;
pub use qdrant_store::QdrantIndex;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;
use vidx_core::{DatabaseConfig, Modality, Result, VectorBackend, VectorRecord};

/// A stored record matched by a similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: Uuid,
    /// Raw cosine similarity in [-1, 1]
    pub score: f32,
    pub modality: Modality,
    pub timestamp: f64,
    pub end_time: Option<f64>,
    pub thumbnail: Option<String>,
    pub text: Option<String>,
}

/// Trait for vector database operations
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension of the video's collection, `None` if it does not exist
    async fn collection_dimension(&self, video_id: Uuid) -> Result<Option<usize>>;

    /// Create the video's collection with payload indexes
    async fn create_collection(&self, video_id: Uuid, dimension: usize) -> Result<()>;

    /// Insert records into the video's collection
    async fn upsert(&self, video_id: Uuid, records: &[VectorRecord]) -> Result<()>;

    /// Nearest records for the video. `NotFound` when nothing was indexed.
    async fn query(&self, video_id: Uuid, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>>;

    /// Records of the video, optionally of one modality. 0 when absent.
    async fn count(&self, video_id: Uuid, modality: Option<Modality>) -> Result<u64>;

    /// Drop all records of the video and return how many there were
    async fn delete_video(&self, video_id: Uuid) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Create the configured vector index backend
pub async fn create_vector_index(config: &DatabaseConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.vector_backend {
        VectorBackend::Qdrant => Ok(Arc::new(QdrantIndex::new(config)?)),
        VectorBackend::Memory => Ok(Arc::new(MemoryIndex::new())),
    }
}
