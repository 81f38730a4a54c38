//! Scene description clients
//!
//! OpenAI-compatible chat completions with an inline image (Groq, OpenAI)
//! and Ollama's generate endpoint for local vision models.

use crate::http::{check_status, decode_json, transport_error};
use crate::SceneDescriber;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vidx_core::{AiConfig, ProviderErrorKind, Result, VidxError, VisionProvider};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

fn empty_description(provider: &str) -> VidxError {
    VidxError::provider(
        ProviderErrorKind::Malformed,
        format!("{provider} returned an empty description"),
    )
}

// ============================================================================
// OpenAI-compatible Vision Client
// ============================================================================

/// Chat-completions vision client (Groq, OpenAI, compatible gateways)
pub struct OpenAiCompatibleVision {
    client: Client,
    provider: String,
    api_key: String,
    base_url: String,
    model: String,
    prompt: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiCompatibleVision {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            provider: provider.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            prompt: AiConfig::default().vision_prompt,
            max_tokens: 300,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>, max_tokens: u32) -> Self {
        self.prompt = prompt.into();
        self.max_tokens = max_tokens;
        self
    }

    /// Create from config for the Groq or OpenAI provider
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let (provider, base_url, key) = match config.vision_provider {
            VisionProvider::Groq => ("groq", GROQ_BASE_URL.to_string(), &config.groq_api_key),
            VisionProvider::OpenAI => (
                "openai",
                config
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                &config.openai_api_key,
            ),
            other => {
                return Err(VidxError::Configuration(format!(
                    "{other:?} is not an OpenAI-compatible vision provider"
                )))
            }
        };
        let api_key = key.as_ref().ok_or_else(|| {
            VidxError::Configuration(format!("{provider} API key required for scene description"))
        })?;

        Ok(Self::new(provider, base_url, api_key.clone(), config.vision_model.clone())
            .with_prompt(config.vision_prompt.clone(), config.vision_max_tokens))
    }

    fn build_request(&self, image: &[u8]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: self.prompt.clone(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/jpeg;base64,{}", STANDARD.encode(image)),
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: 0.2,
        }
    }
}

#[async_trait]
impl SceneDescriber for OpenAiCompatibleVision {
    async fn describe_scene(&self, image: &[u8]) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.build_request(image))
            .send()
            .await
            .map_err(|e| transport_error(&self.provider, e))?;

        let response = check_status(&self.provider, response).await?;
        let result: ChatResponse = decode_json(&self.provider, response).await?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| empty_description(&self.provider))
    }

    fn name(&self) -> &str {
        &self.provider
    }
}

// ============================================================================
// Ollama Vision Client
// ============================================================================

/// Local vision model served by Ollama (llava, llama3.2-vision, ...)
pub struct OllamaVision {
    client: Client,
    base_url: String,
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl OllamaVision {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            prompt: AiConfig::default().vision_prompt,
        }
    }

    pub fn from_config(config: &AiConfig) -> Self {
        let mut vision = Self::new(config.ollama_url.clone(), config.vision_model.clone());
        vision.prompt = config.vision_prompt.clone();
        vision
    }
}

#[async_trait]
impl SceneDescriber for OllamaVision {
    async fn describe_scene(&self, image: &[u8]) -> Result<String> {
        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            images: vec![STANDARD.encode(image)],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("ollama", e))?;

        let response = check_status("ollama", response).await?;
        let result: OllamaGenerateResponse = decode_json("ollama", response).await?;

        let text = result.response.trim();
        if text.is_empty() {
            return Err(empty_description("ollama"));
        }
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create the configured scene describer, if any
pub fn create_scene_describer(config: &AiConfig) -> Result<Option<Arc<dyn SceneDescriber>>> {
    match config.vision_provider {
        VisionProvider::Groq | VisionProvider::OpenAI => {
            Ok(Some(Arc::new(OpenAiCompatibleVision::from_config(config)?)))
        }
        VisionProvider::Ollama => Ok(Some(Arc::new(OllamaVision::from_config(config)))),
        VisionProvider::None => Ok(None),
    }
}
