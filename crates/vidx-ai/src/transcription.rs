//! Speech-to-text via the OpenAI-compatible transcription endpoint
//!
//! Groq and OpenAI both serve Whisper at `/audio/transcriptions`;
//! `verbose_json` gives timed segments.

use crate::http::{check_status, decode_json, transport_error};
use crate::vision::{GROQ_BASE_URL, OPENAI_BASE_URL};
use crate::Transcriber;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use vidx_core::{AiConfig, Result, TranscriptSegment, TranscriptionProvider, VidxError};

/// Whisper client for OpenAI-compatible APIs
pub struct WhisperTranscriber {
    client: Client,
    provider: String,
    api_key: String,
    base_url: String,
    model: String,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

impl WhisperTranscriber {
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
            language: None,
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let (provider, base_url, key) = match config.transcription_provider {
            TranscriptionProvider::Groq => {
                ("groq", GROQ_BASE_URL.to_string(), &config.groq_api_key)
            }
            TranscriptionProvider::OpenAI => (
                "openai",
                config
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                &config.openai_api_key,
            ),
            TranscriptionProvider::None => {
                return Err(VidxError::Configuration(
                    "Transcription is disabled".to_string(),
                ))
            }
        };
        let api_key = key.as_ref().ok_or_else(|| {
            VidxError::Configuration(format!("{provider} API key required for transcription"))
        })?;

        Ok(
            Self::new(provider, base_url, api_key.clone(), config.transcription_model.clone())
                .with_language(config.transcription_language.clone()),
        )
    }

    fn build_form(&self, file_name: String, audio: Vec<u8>) -> Result<Form> {
        let part = Part::bytes(audio)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| VidxError::Media(format!("Invalid audio part: {e}")))?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("temperature", "0");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        Ok(form)
    }
}

/// Keep well-formed segments, trimmed, in time order
fn into_segments(segments: Vec<WhisperSegment>) -> Vec<TranscriptSegment> {
    let mut result: Vec<TranscriptSegment> = segments
        .into_iter()
        .map(|s| TranscriptSegment::new(s.start, s.end, s.text.trim()))
        .filter(|s| s.validate().is_ok())
        .collect();
    result.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    result
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<TranscriptSegment>> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| VidxError::Media(format!("Failed to read audio track: {e}")))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(self.build_form(file_name, bytes)?)
            .send()
            .await
            .map_err(|e| transport_error(&self.provider, e))?;

        let response = check_status(&self.provider, response).await?;
        let result: VerboseTranscription = decode_json(&self.provider, response).await?;

        let segments = into_segments(result.segments);
        tracing::debug!(provider = %self.provider, segments = segments.len(), "Transcribed audio");
        Ok(segments)
    }

    fn name(&self) -> &str {
        &self.provider
    }
}

/// Create the configured transcriber, if transcription is enabled
pub fn create_transcriber(config: &AiConfig) -> Result<Option<Arc<dyn Transcriber>>> {
    match config.transcription_provider {
        TranscriptionProvider::None => Ok(None),
        _ => Ok(Some(Arc::new(WhisperTranscriber::from_config(config)?))),
    }
}
