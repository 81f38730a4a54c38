//! vidx Media - Video decomposition
//!
//! Turns a video file into what the AI stages consume:
//! - probe: duration, resolution, audio presence (validation)
//! - frames: fixed-interval stills, yielded lazily in bounded batches
//! - audio: mono 16 kHz speech track
//! - thumbnails: small JPEGs for search results
//!
//! The production backend shells out to ffmpeg/ffprobe.

pub mod ffmpeg;
pub mod frames;
pub mod probe;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use ffmpeg::{FfmpegConfig, FfmpegDecomposer};
pub use frames::{frame_file_name, planned_frame_count, FrameSequence};
pub use probe::{safe_file_name, validate_source, SourceLimits};

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::watch;
use vidx_core::{AudioTrack, Frame, MediaInfo, Result};

/// Trait for media decomposition backends
#[async_trait]
pub trait Decomposer: Send + Sync {
    /// Validate the file and read its stream layout
    async fn probe(&self, source: &Path) -> Result<MediaInfo>;

    /// Sample one frame every `interval` seconds into `out_dir`.
    ///
    /// `progress` receives the extraction fraction in [0, 1].
    async fn extract_frames(
        &self,
        source: &Path,
        info: &MediaInfo,
        interval: f64,
        out_dir: &Path,
        progress: Option<watch::Sender<f32>>,
    ) -> Result<FrameSequence>;

    /// Extract the speech track; `None` when the video has no audio
    async fn extract_audio(
        &self,
        source: &Path,
        info: &MediaInfo,
        out_dir: &Path,
    ) -> Result<Option<AudioTrack>>;

    /// Write a scaled JPEG of `frame` to `dest`
    async fn thumbnail(&self, frame: &Frame, dest: &Path) -> Result<()>;

    /// Check that the backend's tools are usable
    async fn is_available(&self) -> bool;

    /// Get the backend name
    fn name(&self) -> &str;
}
