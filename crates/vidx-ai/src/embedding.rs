//! Embedding clients for generating vector representations
//!
//! Supports Jina (text and CLIP image input), OpenAI and Ollama embedding
//! APIs. Every client declares its output dimension so the index can be
//! checked against the active provider.
//!
//! Author: hephaex@gmail.com

use crate::http::{check_status, decode_json, transport_error};
use crate::{EmbedPurpose, ImageEmbedder, TextEmbedder};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vidx_core::{AiConfig, EmbeddingProvider, ProviderErrorKind, Result, VidxError};

const JINA_BASE_URL: &str = "https://api.jina.ai/v1";

/// Output dimension a provider/model pair will produce.
///
/// Models with a fixed size report it; models that accept a requested size
/// (Jina v3, Jina CLIP v2, OpenAI v3) and unknown models report `configured`.
pub fn declared_dimension(provider: EmbeddingProvider, model: &str, configured: usize) -> usize {
    match provider {
        EmbeddingProvider::Jina => match model {
            "jina-embeddings-v2-base-en" | "jina-clip-v1" => 768,
            _ => configured,
        },
        EmbeddingProvider::OpenAI => match model {
            "text-embedding-ada-002" => 1536,
            _ => configured,
        },
        EmbeddingProvider::Ollama => match model {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => configured,
        },
    }
}

fn missing_embedding(provider: &str) -> VidxError {
    VidxError::provider(
        ProviderErrorKind::Malformed,
        format!("{provider} returned no embedding"),
    )
}

/// OpenAI-style `{data: [{embedding, index}]}` response (OpenAI and Jina)
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl EmbeddingResponse {
    fn first(self, provider: &str) -> Result<Vec<f32>> {
        let mut data = self.data;
        data.sort_by_key(|e| e.index);
        data.into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| missing_embedding(provider))
    }
}

// ============================================================================
// Jina Embedding Client
// ============================================================================

/// Jina embedding API client
pub struct JinaEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct JinaRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    input: Vec<JinaInput>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum JinaInput {
    Plain(String),
    Text { text: String },
    Image { image: String },
}

impl JinaEmbedding {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let model = model.into();
        let dimension = declared_dimension(EmbeddingProvider::Jina, &model, dimension);
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: JINA_BASE_URL.to_string(),
            model,
            dimension,
        }
    }

    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = config
            .jina_api_key
            .as_ref()
            .ok_or_else(|| VidxError::Configuration("Jina API key required".to_string()))?;
        Ok(Self::new(
            api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
        ))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// CLIP models embed images and text into one space
    pub fn supports_images(&self) -> bool {
        self.model.starts_with("jina-clip")
    }

    fn task(purpose: EmbedPurpose) -> &'static str {
        match purpose {
            EmbedPurpose::Passage => "retrieval.passage",
            EmbedPurpose::Query => "retrieval.query",
        }
    }

    fn dimensions(&self) -> Option<usize> {
        (self.model.contains("-v3") || self.model == "jina-clip-v2").then_some(self.dimension)
    }

    fn text_request(&self, text: &str, purpose: EmbedPurpose) -> JinaRequest {
        let input = if self.supports_images() {
            JinaInput::Text {
                text: text.to_string(),
            }
        } else {
            JinaInput::Plain(text.to_string())
        };
        JinaRequest {
            model: self.model.clone(),
            task: Some(Self::task(purpose)),
            dimensions: self.dimensions(),
            input: vec![input],
        }
    }

    fn image_request(&self, image: &[u8]) -> JinaRequest {
        JinaRequest {
            model: self.model.clone(),
            task: None,
            dimensions: self.dimensions(),
            input: vec![JinaInput::Image {
                image: STANDARD.encode(image),
            }],
        }
    }

    async fn send(&self, request: &JinaRequest) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("jina", e))?;

        let response = check_status("jina", response).await?;
        let result: EmbeddingResponse = decode_json("jina", response).await?;
        result.first("jina")
    }
}

#[async_trait]
impl TextEmbedder for JinaEmbedding {
    async fn embed_text(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        self.send(&self.text_request(text, purpose)).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "jina"
    }
}

#[async_trait]
impl ImageEmbedder for JinaEmbedding {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        self.send(&self.image_request(image)).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "jina"
    }
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

/// OpenAI embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest {
    input: Vec<String>,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let model = model.into();
        let dimension = declared_dimension(EmbeddingProvider::OpenAI, &model, dimension);
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model,
            dimension,
        }
    }

    /// Create from config
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| VidxError::Configuration("OpenAI API key required".to_string()))?;

        let mut client = Self::new(
            api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
        );
        if let Some(url) = &config.openai_base_url {
            client.base_url = url.clone();
        }
        Ok(client)
    }
}

#[async_trait]
impl TextEmbedder for OpenAiEmbedding {
    async fn embed_text(&self, text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>> {
        let request = OpenAiEmbeddingRequest {
            input: vec![text.to_string()],
            model: self.model.clone(),
            // Only the v3 models accept a requested size
            dimensions: self
                .model
                .starts_with("text-embedding-3")
                .then_some(self.dimension),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        let response = check_status("openai", response).await?;
        let result: EmbeddingResponse = decode_json("openai", response).await?;
        result.first("openai")
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let model = model.into();
        let dimension = declared_dimension(EmbeddingProvider::Ollama, &model, dimension);
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model,
            dimension,
        }
    }

    /// Create from config
    pub fn from_config(config: &AiConfig) -> Self {
        Self::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
        )
    }
}

#[async_trait]
impl TextEmbedder for OllamaEmbedding {
    async fn embed_text(&self, text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("ollama", e))?;

        let response = check_status("ollama", response).await?;
        let result: OllamaEmbeddingResponse = decode_json("ollama", response).await?;
        if result.embedding.is_empty() {
            return Err(missing_embedding("ollama"));
        }
        Ok(result.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ============================================================================
// Factory functions
// ============================================================================

/// Create the configured text embedder
pub fn create_text_embedder(config: &AiConfig) -> Result<Arc<dyn TextEmbedder>> {
    match config.embedding_provider {
        EmbeddingProvider::Jina => Ok(Arc::new(JinaEmbedding::from_config(config)?)),
        EmbeddingProvider::OpenAI => Ok(Arc::new(OpenAiEmbedding::from_config(config)?)),
        EmbeddingProvider::Ollama => Ok(Arc::new(OllamaEmbedding::from_config(config))),
    }
}

/// Create an image embedder when direct frame embedding is enabled and the
/// configured model is multimodal
pub fn create_image_embedder(config: &AiConfig) -> Result<Option<Arc<dyn ImageEmbedder>>> {
    if !config.embed_images {
        return Ok(None);
    }
    match config.embedding_provider {
        EmbeddingProvider::Jina => {
            let client = JinaEmbedding::from_config(config)?;
            if client.supports_images() {
                Ok(Some(Arc::new(client)))
            } else {
                Err(VidxError::Configuration(format!(
                    "Embedding model {} cannot embed images",
                    config.embedding_model
                )))
            }
        }
        other => Err(VidxError::Configuration(format!(
            "Image embedding is not supported by {other:?}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
