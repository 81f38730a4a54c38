//! vidx AI - Provider gateway
//!
//! Capability traits for the external models the pipeline depends on:
//! - [`SceneDescriber`]: frame image to natural-language description
//! - [`Transcriber`]: audio track to timed transcript segments
//! - [`TextEmbedder`] / [`ImageEmbedder`]: content to fixed-dimension vectors
//!
//! [`AiGateway`] composes them and applies timeout, retry and the
//! embedding dimension check uniformly to every call.
//!
//! Author: hephaex@gmail.com

pub mod batch;
pub mod embedding;
pub mod gateway;
pub mod http;
pub mod transcription;
pub mod vision;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use batch::run_bounded;
pub use embedding::{
    create_image_embedder, create_text_embedder, declared_dimension, JinaEmbedding,
    OllamaEmbedding, OpenAiEmbedding,
};
pub use gateway::AiGateway;
pub use transcription::{create_transcriber, WhisperTranscriber};
pub use vision::{create_scene_describer, OllamaVision, OpenAiCompatibleVision};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use vidx_core::{Result, TranscriptSegment};

// ============================================================================
// Capability Traits
// ============================================================================

/// Which side of a retrieval pair a text is embedded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedPurpose {
    /// Indexed content (descriptions, transcripts)
    Passage,
    /// Search queries
    Query,
}

/// Frame image to scene description
#[async_trait]
pub trait SceneDescriber: Send + Sync {
    /// Describe a JPEG-encoded frame
    async fn describe_scene(&self, image: &[u8]) -> Result<String>;

    fn name(&self) -> &str;
}

/// Audio track to transcript segments
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file; segments come back in time order
    async fn transcribe(&self, audio: &Path) -> Result<Vec<TranscriptSegment>>;

    fn name(&self) -> &str;
}

/// Text to vector
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed_text(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>>;

    /// Declared output dimension
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Image to vector, in the same space as the text embedder
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>>;

    /// Declared output dimension
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

// ============================================================================
// Capabilities
// ============================================================================

/// How a frame becomes a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualStrategy {
    /// Multimodal embedder takes the image itself
    DirectImage,
    /// Vision model describes the frame, the text embedder embeds the description
    DescribeThenEmbed,
}

/// What the configured providers can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub visual: VisualStrategy,
    pub scene_description: bool,
    pub transcription: bool,
    pub embedding_dimension: usize,
    pub embedder: String,
}

/// Vector for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct VisualEmbedding {
    pub embedding: Vec<f32>,
    /// Present with the describe-then-embed strategy
    pub description: Option<String>,
}
