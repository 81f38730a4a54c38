//! Source validation and ffprobe output parsing

use serde::Deserialize;
use std::path::Path;
use vidx_core::{MediaConfig, MediaInfo, Result, VidxError};

// ============================================================================
// Source Limits
// ============================================================================

/// Acceptance rules for uploaded files
#[derive(Debug, Clone)]
pub struct SourceLimits {
    pub max_size_bytes: u64,
    /// Lowercase extensions without the dot
    pub supported_formats: Vec<String>,
}

impl SourceLimits {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            max_size_bytes: config.max_video_size_bytes(),
            supported_formats: config
                .supported_formats
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
        }
    }

    pub fn allows_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.supported_formats.iter().any(|f| f == &e.to_lowercase()))
            .unwrap_or(false)
    }
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self::from_config(&MediaConfig::default())
    }
}

/// Reduce a client-supplied file name to a flat, portable one
pub fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Check that the file exists, has a supported extension and fits the size cap.
/// Returns the file size.
pub async fn validate_source(source: &Path, limits: &SourceLimits) -> Result<u64> {
    let metadata = tokio::fs::metadata(source).await.map_err(|_| {
        VidxError::Validation(format!("Video file not found: {}", source.display()))
    })?;

    if !metadata.is_file() {
        return Err(VidxError::Validation(format!(
            "Not a regular file: {}",
            source.display()
        )));
    }
    if !limits.allows_extension(source) {
        return Err(VidxError::Validation(format!(
            "Unsupported format. Allowed: {}",
            limits.supported_formats.join(", ")
        )));
    }
    if metadata.len() == 0 {
        return Err(VidxError::Validation("Video file is empty".to_string()));
    }
    if metadata.len() > limits.max_size_bytes {
        return Err(VidxError::Validation(format!(
            "File too large: {} bytes exceeds the {} byte limit",
            metadata.len(),
            limits.max_size_bytes
        )));
    }
    Ok(metadata.len())
}

// ============================================================================
// ffprobe JSON
// ============================================================================

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Option<Vec<FfprobeStream>>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

/// Turn `ffprobe -print_format json -show_format -show_streams` output into
/// [`MediaInfo`]. A file without a video stream or a positive duration is
/// rejected as invalid input.
pub fn parse_probe_output(json: &str, file_size: u64) -> Result<MediaInfo> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| VidxError::Validation(format!("Unreadable probe output: {e}")))?;

    let streams = output.streams.unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| VidxError::Validation("No video stream found".to_string()))?;
    let has_audio = streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| VidxError::Validation("Video has no measurable duration".to_string()))?;

    let size_bytes = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse().ok())
        .unwrap_or(file_size);

    Ok(MediaInfo {
        duration_seconds: duration,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        fps: video
            .r_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        codec: video
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        has_audio,
        size_bytes,
    })
}

/// Parse "30000/1001" or "25" into frames per second
pub fn parse_frame_rate(rate: &str) -> f64 {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => rate.trim().parse().unwrap_or(0.0),
    }
}
