//! vidx Core - Domain models, errors, and shared infrastructure
//!
//! This crate defines the core abstractions used throughout vidx:
//! - Video assets, processing jobs and their lifecycle
//! - Frames, transcript segments and vector records
//! - The error taxonomy shared by every stage
//! - Retry policy for external calls
//! - Configuration management
//! - Job/status store (PostgreSQL and in-memory)
//!
//! Author: hephaex@gmail.com

pub mod config;
pub mod pg_store;
pub mod retry;
pub mod store;

pub use config::{
    AiConfig, AppConfig, ConfigError, DatabaseConfig, EmbeddingProvider, JobBackend, JobsConfig,
    LoggingConfig, MediaConfig, RetryConfig, SearchConfig, ServerConfig, TranscriptionProvider,
    VectorBackend, VisionProvider,
};
pub use pg_store::PgJobStore;
pub use retry::RetryPolicy;
pub use store::{JobStore, MemoryJobStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// How an AI provider call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Call exceeded its deadline
    Timeout,
    /// Provider asked us to slow down (HTTP 429)
    RateLimited,
    /// Connection failure or 5xx
    Unavailable,
    /// Credentials rejected (HTTP 401/403)
    Unauthorized,
    /// Input rejected (other 4xx)
    Rejected,
    /// Response could not be decoded
    Malformed,
}

impl ProviderErrorKind {
    /// Transient kinds are worth another attempt
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::Unavailable)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Rejected => write!(f, "rejected"),
            Self::Malformed => write!(f, "malformed response"),
        }
    }
}

/// Core error types for vidx operations
#[derive(Error, Debug)]
pub enum VidxError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A single unit (frame, audio track) could not be decoded or written
    #[error("Media error: {0}")]
    Media(String),

    #[error("Provider {kind}: {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{service} unavailable: {message}")]
    Infrastructure { service: String, message: String },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VidxError>;

impl VidxError {
    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::Provider {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn infrastructure(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Infrastructure {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether a retry policy should attempt the call again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { kind, .. } => kind.is_transient(),
            Self::Infrastructure { .. } => true,
            _ => false,
        }
    }

    /// Whether the error aborts the whole job rather than a single unit
    pub fn is_fatal_for_job(&self) -> bool {
        match self {
            Self::Media(_) => false,
            Self::Provider { kind, .. } => *kind == ProviderErrorKind::Unauthorized,
            _ => true,
        }
    }

    /// Error class recorded on a failed job
    pub fn job_error_kind(&self) -> JobErrorKind {
        match self {
            Self::Validation(_) | Self::Media(_) => JobErrorKind::Validation,
            Self::Provider { kind, .. } if *kind == ProviderErrorKind::Unauthorized => {
                JobErrorKind::Configuration
            }
            Self::Provider { .. } => JobErrorKind::TransientProvider,
            Self::Configuration(_) | Self::DimensionMismatch { .. } => JobErrorKind::Configuration,
            Self::Cancelled => JobErrorKind::Cancelled,
            Self::NotFound(_) | Self::Infrastructure { .. } | Self::Conflict(_) | Self::Other(_) => {
                JobErrorKind::Infrastructure
            }
        }
    }

    /// Normalized, user-facing summary. Raw provider output stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(what) => format!("{what} not found"),
            Self::Validation(msg) => msg.clone(),
            Self::Media(_) => "Media could not be decoded".to_string(),
            Self::Provider { kind, .. } => match kind {
                ProviderErrorKind::Timeout => "AI provider timed out".to_string(),
                ProviderErrorKind::RateLimited => "AI provider rate limit exceeded".to_string(),
                ProviderErrorKind::Unavailable => "AI provider unavailable".to_string(),
                ProviderErrorKind::Unauthorized => "AI provider rejected credentials".to_string(),
                ProviderErrorKind::Rejected => "AI provider rejected the input".to_string(),
                ProviderErrorKind::Malformed => {
                    "AI provider returned an unreadable response".to_string()
                }
            },
            Self::Configuration(msg) => msg.clone(),
            Self::DimensionMismatch { expected, actual } => format!(
                "Embedding dimension mismatch: index expects {expected}, provider returns {actual}"
            ),
            Self::Infrastructure { service, .. } => format!("{service} unavailable"),
            Self::Cancelled => "Job cancelled".to_string(),
            Self::Conflict(msg) => msg.clone(),
            Self::Other(_) => "Internal error".to_string(),
        }
    }
}

// ============================================================================
// Video Assets
// ============================================================================

/// An uploaded video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAsset {
    pub video_id: Uuid,
    pub source_path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    /// Recorded once by the validation stage
    pub duration_seconds: Option<f64>,
    /// Recorded once by the validation stage
    pub has_audio: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl VideoAsset {
    pub fn new(
        video_id: Uuid,
        source_path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            video_id,
            source_path: source_path.into(),
            file_name: file_name.into(),
            size_bytes,
            duration_seconds: None,
            has_audio: None,
            created_at: Utc::now(),
        }
    }
}

/// Probe result for a video file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub has_audio: bool,
    pub size_bytes: u64,
}

// ============================================================================
// Processing Jobs
// ============================================================================

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = VidxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(VidxError::Validation(format!("Unknown job status: {other}"))),
        }
    }
}

/// Error class recorded on a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Validation,
    TransientProvider,
    Configuration,
    Infrastructure,
    Cancelled,
}

impl JobErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::TransientProvider => "transient_provider",
            Self::Configuration => "configuration",
            Self::Infrastructure => "infrastructure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobErrorKind {
    type Err = VidxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "validation" => Ok(Self::Validation),
            "transient_provider" => Ok(Self::TransientProvider),
            "configuration" => Ok(Self::Configuration),
            "infrastructure" => Ok(Self::Infrastructure),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(VidxError::Validation(format!("Unknown error kind: {other}"))),
        }
    }
}

/// Normalized failure recorded on a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    /// Resubmitting the same video may succeed
    pub retriable: bool,
}

impl JobError {
    pub fn cancelled() -> Self {
        Self {
            kind: JobErrorKind::Cancelled,
            message: "Job cancelled".to_string(),
            retriable: true,
        }
    }

    /// Its worker stopped reporting before the job finished
    pub fn abandoned() -> Self {
        Self {
            kind: JobErrorKind::Infrastructure,
            message: "Worker stopped before finishing the job".to_string(),
            retriable: true,
        }
    }
}

impl From<&VidxError> for JobError {
    fn from(err: &VidxError) -> Self {
        let kind = err.job_error_kind();
        let retriable = match err {
            VidxError::Provider { kind, .. } => kind.is_transient(),
            VidxError::Infrastructure { .. } | VidxError::Cancelled => true,
            _ => false,
        };
        Self {
            kind,
            message: err.user_message(),
            retriable,
        }
    }
}

/// A unit of indexing work for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub job_id: Uuid,
    pub video_id: Uuid,
    pub status: JobStatus,
    /// Non-decreasing, in [0, 1]
    pub progress: f32,
    pub frames_processed: u32,
    pub total_frames: u32,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(video_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            video_id,
            status: JobStatus::Pending,
            progress: 0.0,
            frames_processed: 0,
            total_frames: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Media Units
// ============================================================================

/// A sampled still image. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: u32,
    /// Seconds from the start of the video
    pub timestamp: f64,
    pub image_path: PathBuf,
}

/// Extracted mono speech track
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub path: PathBuf,
}

/// A transcribed span of speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            text: text.into(),
        }
    }

    /// start < end and non-empty text
    pub fn validate(&self) -> Result<()> {
        if self.start_time.partial_cmp(&self.end_time) != Some(std::cmp::Ordering::Less) {
            return Err(VidxError::Validation(format!(
                "Transcript segment start {} must precede end {}",
                self.start_time, self.end_time
            )));
        }
        if self.text.trim().is_empty() {
            return Err(VidxError::Validation(
                "Transcript segment text is empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Vector Records
// ============================================================================

/// Which stream a vector came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Visual,
    Audio,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visual => "visual",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modality {
    type Err = VidxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "visual" => Ok(Self::Visual),
            "audio" => Ok(Self::Audio),
            other => Err(VidxError::Validation(format!("Unknown modality: {other}"))),
        }
    }
}

/// An embedding plus its payload, the unit of the vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub video_id: Uuid,
    pub modality: Modality,
    pub timestamp: f64,
    /// End of the transcript segment (audio only)
    pub end_time: Option<f64>,
    pub embedding: Vec<f32>,
    /// Thumbnail file name (visual only)
    pub thumbnail: Option<String>,
    /// Transcript text (audio) or scene description (visual, when produced)
    pub text: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

impl VectorRecord {
    pub fn visual(
        video_id: Uuid,
        timestamp: f64,
        embedding: Vec<f32>,
        thumbnail: Option<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id,
            modality: Modality::Visual,
            timestamp,
            end_time: None,
            embedding,
            thumbnail,
            text: description,
            indexed_at: Utc::now(),
        }
    }

    pub fn audio(video_id: Uuid, segment: &TranscriptSegment, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id,
            modality: Modality::Audio,
            timestamp: segment.start_time,
            end_time: Some(segment.end_time),
            embedding,
            thumbnail: None,
            text: Some(segment.text.clone()),
            indexed_at: Utc::now(),
        }
    }
}

// ============================================================================
// Search Results
// ============================================================================

/// A single timestamp match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub timestamp: f64,
    /// Cosine similarity clamped to [0, 1]
    pub score: f32,
    #[serde(rename = "type")]
    pub modality: Modality,
    pub thumbnail_url: Option<String>,
    pub transcript_snippet: Option<String>,
}

/// Ranked matches for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub video_id: Uuid,
    pub results: Vec<SearchResult>,
    pub total_results: usize,
}

// ============================================================================
// Tests
// ============================================================================
