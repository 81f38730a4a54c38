//! AI gateway
//!
//! Single entry point the pipeline and search use to reach AI providers.
//! Every call gets a deadline and the retry policy; every vector is checked
//! against the configured dimension before it is returned.

use crate::embedding::{create_image_embedder, create_text_embedder};
use crate::transcription::create_transcriber;
use crate::vision::create_scene_describer;
use crate::{
    Capabilities, EmbedPurpose, ImageEmbedder, SceneDescriber, TextEmbedder, Transcriber,
    VisualEmbedding, VisualStrategy,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vidx_core::retry::with_timeout;
use vidx_core::{
    AiConfig, Frame, ProviderErrorKind, Result, RetryPolicy, TranscriptSegment, VidxError,
};

/// Text used to measure the live embedding dimension
const DIMENSION_PROBE: &str = "dimension probe";

/// Provider composition with uniform timeout, retry and dimension checks
#[derive(Clone)]
pub struct AiGateway {
    describer: Option<Arc<dyn SceneDescriber>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    text_embedder: Arc<dyn TextEmbedder>,
    image_embedder: Option<Arc<dyn ImageEmbedder>>,
    dimension: usize,
    retry: RetryPolicy,
    call_timeout: Duration,
    max_concurrency: usize,
}

impl AiGateway {
    /// Create a gateway around a text embedder that must produce `dimension`
    pub fn new(text_embedder: Arc<dyn TextEmbedder>, dimension: usize) -> Result<Self> {
        if text_embedder.dimension() != dimension {
            return Err(VidxError::Configuration(format!(
                "Embedder {} declares dimension {}, configured dimension is {dimension}",
                text_embedder.name(),
                text_embedder.dimension()
            )));
        }
        Ok(Self {
            describer: None,
            transcriber: None,
            text_embedder,
            image_embedder: None,
            dimension,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            max_concurrency: 4,
        })
    }

    pub fn with_describer(mut self, describer: Arc<dyn SceneDescriber>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_image_embedder(mut self, embedder: Arc<dyn ImageEmbedder>) -> Result<Self> {
        if embedder.dimension() != self.dimension {
            return Err(VidxError::Configuration(format!(
                "Image embedder {} declares dimension {}, configured dimension is {}",
                embedder.name(),
                embedder.dimension(),
                self.dimension
            )));
        }
        self.image_embedder = Some(embedder);
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Build providers from config
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let mut gateway = Self::new(create_text_embedder(config)?, config.embedding_dimension)?
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_timeout(config.timeout())
            .with_max_concurrency(config.max_concurrency);

        if let Some(describer) = create_scene_describer(config)? {
            gateway = gateway.with_describer(describer);
        }
        if let Some(transcriber) = create_transcriber(config)? {
            gateway = gateway.with_transcriber(transcriber);
        }
        if let Some(embedder) = create_image_embedder(config)? {
            gateway = gateway.with_image_embedder(embedder)?;
        }

        if gateway.visual_strategy().is_none() {
            return Err(VidxError::Configuration(
                "No visual strategy: configure a vision provider or a multimodal embedder"
                    .to_string(),
            ));
        }
        Ok(gateway)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Direct image embedding wins over describe-then-embed
    pub fn visual_strategy(&self) -> Option<VisualStrategy> {
        if self.image_embedder.is_some() {
            Some(VisualStrategy::DirectImage)
        } else if self.describer.is_some() {
            Some(VisualStrategy::DescribeThenEmbed)
        } else {
            None
        }
    }

    pub fn capabilities(&self) -> Result<Capabilities> {
        let visual = self.visual_strategy().ok_or_else(|| {
            VidxError::Configuration("No visual strategy available".to_string())
        })?;
        Ok(Capabilities {
            visual,
            scene_description: self.describer.is_some(),
            transcription: self.transcriber.is_some(),
            embedding_dimension: self.dimension,
            embedder: self.text_embedder.name().to_string(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn can_transcribe(&self) -> bool {
        self.transcriber.is_some()
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.call_timeout;
        self.retry
            .run(operation, || with_timeout(limit, operation, f()))
            .await
    }

    fn check_vector(&self, vector: Vec<f32>) -> Result<Vec<f32>> {
        if vector.len() != self.dimension {
            return Err(VidxError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(VidxError::provider(
                ProviderErrorKind::Malformed,
                "Embedding contains non-finite values",
            ));
        }
        Ok(vector)
    }

    pub async fn describe_scene(&self, image: &[u8]) -> Result<String> {
        let describer = self.describer.as_ref().ok_or_else(|| {
            VidxError::Configuration("No scene description provider configured".to_string())
        })?;
        self.call("describe_scene", move || describer.describe_scene(image))
            .await
    }

    /// Transcribe an audio track; empty when no transcriber is configured
    pub async fn transcribe(&self, audio: &Path) -> Result<Vec<TranscriptSegment>> {
        let Some(transcriber) = self.transcriber.as_ref() else {
            return Ok(Vec::new());
        };
        self.call("transcribe", move || transcriber.transcribe(audio))
            .await
    }

    pub async fn embed_text(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        let embedder = &self.text_embedder;
        let vector = self
            .call("embed_text", move || embedder.embed_text(text, purpose))
            .await?;
        self.check_vector(vector)
    }

    /// Embed a search query (query-side retrieval task)
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_text(query, EmbedPurpose::Query).await
    }

    pub async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        let embedder = self.image_embedder.as_ref().ok_or_else(|| {
            VidxError::Configuration("No image embedder configured".to_string())
        })?;
        let vector = self
            .call("embed_image", move || embedder.embed_image(image))
            .await?;
        self.check_vector(vector)
    }

    /// Turn one frame into a vector using the active visual strategy
    pub async fn embed_frame(&self, frame: &Frame) -> Result<VisualEmbedding> {
        let strategy = self.visual_strategy().ok_or_else(|| {
            VidxError::Configuration("No visual strategy available".to_string())
        })?;
        let image = tokio::fs::read(&frame.image_path).await.map_err(|e| {
            VidxError::Media(format!(
                "Frame {} unreadable ({}): {e}",
                frame.index,
                frame.image_path.display()
            ))
        })?;

        match strategy {
            VisualStrategy::DirectImage => Ok(VisualEmbedding {
                embedding: self.embed_image(&image).await?,
                description: None,
            }),
            VisualStrategy::DescribeThenEmbed => {
                let description = self.describe_scene(&image).await?;
                let embedding = self.embed_text(&description, EmbedPurpose::Passage).await?;
                Ok(VisualEmbedding {
                    embedding,
                    description: Some(description),
                })
            }
        }
    }

    /// Probe the live provider and confirm it returns the configured size
    pub async fn verify_dimension(&self) -> Result<usize> {
        let vector = self.embed_text(DIMENSION_PROBE, EmbedPurpose::Passage).await?;
        tracing::debug!(
            embedder = self.text_embedder.name(),
            dimension = vector.len(),
            "Verified embedding dimension"
        );
        Ok(vector.len())
    }
}
