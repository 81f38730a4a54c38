//! Qdrant implementation for vector storage
//!
//! Collections are named `{prefix}_{video_id}` and carry keyword payload
//! indexes on `video_id` and `type`.
//!
//! Author: hephaex@gmail.com

use crate::{VectorHit, VectorIndex};
use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    Distance, FieldType, Filter, PointStruct, ScoredPoint, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use uuid::Uuid;
use vidx_core::{DatabaseConfig, Modality, Result, VectorRecord, VidxError};

const SERVICE: &str = "vector store";

fn store_error(context: &str, e: impl std::fmt::Display) -> VidxError {
    VidxError::infrastructure(SERVICE, format!("{context}: {e}"))
}

/// Qdrant vector index
pub struct QdrantIndex {
    client: Qdrant,
    prefix: String,
}

impl QdrantIndex {
    /// Create a new Qdrant connection
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.qdrant_url).timeout(config.vector_timeout());
        if let Some(key) = &config.qdrant_api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| VidxError::Configuration(format!("Qdrant connection failed: {e}")))?;

        Ok(Self {
            client,
            prefix: config.collection_prefix.clone(),
        })
    }

    pub fn collection_name(&self, video_id: Uuid) -> String {
        format!("{}_{}", self.prefix, video_id)
    }

    async fn exists(&self, collection: &str) -> Result<bool> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(|e| store_error("Failed to check collection", e))
    }

    fn video_filter(video_id: Uuid, modality: Option<Modality>) -> Filter {
        let mut conditions = vec![Condition::matches("video_id", video_id.to_string())];
        if let Some(modality) = modality {
            conditions.push(Condition::matches("type", modality.as_str().to_string()));
        }
        Filter::must(conditions)
    }

    fn to_point(record: &VectorRecord) -> PointStruct {
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("video_id".to_string(), record.video_id.to_string().into());
        payload.insert("type".to_string(), record.modality.as_str().to_string().into());
        payload.insert("timestamp".to_string(), record.timestamp.into());
        payload.insert("indexed_at".to_string(), record.indexed_at.to_rfc3339().into());
        if let Some(end) = record.end_time {
            payload.insert("end_time".to_string(), end.into());
        }
        if let Some(thumbnail) = &record.thumbnail {
            payload.insert("thumbnail".to_string(), thumbnail.clone().into());
        }
        if let Some(text) = &record.text {
            payload.insert("text".to_string(), text.clone().into());
        }

        PointStruct::new(record.id.to_string(), record.embedding.clone(), payload)
    }

    fn to_hit(point: ScoredPoint) -> Option<VectorHit> {
        let payload = point.payload;
        let modality = payload
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Modality>().ok())?;
        let timestamp = payload.get("timestamp").and_then(|v| v.as_double())?;
        let id = match point.id.and_then(|id| id.point_id_options) {
            Some(PointIdOptions::Uuid(s)) => Uuid::parse_str(&s).ok()?,
            _ => return None,
        };

        Some(VectorHit {
            id,
            score: point.score,
            modality,
            timestamp,
            end_time: payload.get("end_time").and_then(|v| v.as_double()),
            thumbnail: payload
                .get("thumbnail")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            text: payload
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn collection_dimension(&self, video_id: Uuid) -> Result<Option<usize>> {
        let collection = self.collection_name(video_id);
        if !self.exists(&collection).await? {
            return Ok(None);
        }

        let info = self
            .client
            .collection_info(&collection)
            .await
            .map_err(|e| store_error("Failed to read collection info", e))?;

        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|config| match config {
                VectorsConfigKind::Params(params) => Some(params.size as usize),
                _ => None,
            })
            .ok_or_else(|| {
                VidxError::Configuration(format!(
                    "Collection {collection} does not use a single unnamed vector"
                ))
            })?;
        Ok(Some(size))
    }

    async fn create_collection(&self, video_id: Uuid, dimension: usize) -> Result<()> {
        let collection = self.collection_name(video_id);
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&collection)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| store_error("Failed to create collection", e))?;

        for field in ["video_id", "type"] {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &collection,
                    field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(|e| store_error("Failed to create payload index", e))?;
        }

        tracing::info!(collection = %collection, dimension, "Created collection");
        Ok(())
    }

    async fn upsert(&self, video_id: Uuid, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let points: Vec<PointStruct> = records.iter().map(Self::to_point).collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection_name(video_id), points).wait(true))
            .await
            .map_err(|e| store_error("Failed to upsert vectors", e))?;
        Ok(())
    }

    async fn query(&self, video_id: Uuid, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        let collection = self.collection_name(video_id);
        if !self.exists(&collection).await? {
            return Err(VidxError::NotFound(format!("Index for video {video_id}")));
        }

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&collection, vector.to_vec(), limit as u64)
                    .filter(Self::video_filter(video_id, None))
                    .with_payload(true),
            )
            .await
            .map_err(|e| store_error("Vector search failed", e))?;

        Ok(results.result.into_iter().filter_map(Self::to_hit).collect())
    }

    async fn count(&self, video_id: Uuid, modality: Option<Modality>) -> Result<u64> {
        let collection = self.collection_name(video_id);
        if !self.exists(&collection).await? {
            return Ok(0);
        }

        let response = self
            .client
            .count(
                CountPointsBuilder::new(&collection)
                    .filter(Self::video_filter(video_id, modality))
                    .exact(true),
            )
            .await
            .map_err(|e| store_error("Failed to count vectors", e))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn delete_video(&self, video_id: Uuid) -> Result<u64> {
        let collection = self.collection_name(video_id);
        if !self.exists(&collection).await? {
            return Ok(0);
        }
        let points = self.count(video_id, None).await?;

        self.client
            .delete_collection(&collection)
            .await
            .map_err(|e| store_error("Failed to delete collection", e))?;

        tracing::info!(collection = %collection, points, "Deleted collection");
        Ok(points)
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .health_check()
            .await
            .map_err(|e| store_error("Health check failed", e))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}
