//! ffmpeg/ffprobe backend
//!
//! Every tool invocation is a child process with `kill_on_drop`, so dropping
//! the future (job cancelled, worker shutdown, deadline hit) also stops the
//! process. No invocation outlives `process_timeout`.

use crate::frames::FrameSequence;
use crate::probe::{parse_probe_output, validate_source, SourceLimits};
use crate::Decomposer;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use vidx_core::{AudioTrack, Frame, MediaConfig, MediaInfo, Result, VidxError};

/// Speech models expect 16 kHz mono PCM
const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// ffmpeg/ffprobe configuration
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub thumbnail_width: u32,
    pub limits: SourceLimits,
    /// Longest any single ffmpeg/ffprobe run may take
    pub process_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self::from_media_config(&MediaConfig::default())
    }
}

impl FfmpegConfig {
    pub fn from_media_config(config: &MediaConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            thumbnail_width: config.thumbnail_width,
            limits: SourceLimits::from_config(config),
            process_timeout: config.process_timeout(),
        }
    }
}

/// Decomposer backed by the ffmpeg command-line tools
pub struct FfmpegDecomposer {
    config: FfmpegConfig,
}

impl FfmpegDecomposer {
    pub fn new() -> Self {
        Self {
            config: FfmpegConfig::default(),
        }
    }

    pub fn with_config(config: FfmpegConfig) -> Self {
        Self { config }
    }

    fn probe_args(source: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "quiet".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            source.to_string_lossy().to_string(),
        ]
    }

    fn frame_args(source: &Path, interval: f64, out_dir: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!("fps=1/{interval}"),
            "-q:v".to_string(),
            "2".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-y".to_string(),
            out_dir.join("frame_%06d.jpg").to_string_lossy().to_string(),
        ]
    }

    fn audio_args(source: &Path, dest: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-ar".to_string(),
            AUDIO_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-y".to_string(),
            dest.to_string_lossy().to_string(),
        ]
    }

    fn thumbnail_args(&self, image: &Path, dest: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            image.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!("scale={}:-1", self.config.thumbnail_width),
            "-q:v".to_string(),
            "5".to_string(),
            "-y".to_string(),
            dest.to_string_lossy().to_string(),
        ]
    }

    fn command(executable: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn timed_out(&self, executable: &str) -> VidxError {
        VidxError::Media(format!(
            "{executable} did not finish within {}s",
            self.config.process_timeout.as_secs_f64()
        ))
    }

    /// Run a tool to completion and return its stdout
    async fn run(&self, executable: &str, args: &[String]) -> Result<Vec<u8>> {
        let output = tokio::time::timeout(
            self.config.process_timeout,
            Self::command(executable, args).output(),
        )
        .await
        .map_err(|_| self.timed_out(executable))?
        .map_err(|e| VidxError::Configuration(format!("Failed to run {executable}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VidxError::Media(format!(
                "{executable} failed: {}",
                last_lines(&stderr, 5)
            )));
        }
        Ok(output.stdout)
    }
}

impl Default for FfmpegDecomposer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Decomposer for FfmpegDecomposer {
    async fn probe(&self, source: &Path) -> Result<MediaInfo> {
        let size = validate_source(source, &self.config.limits).await?;
        let stdout = self
            .run(&self.config.ffprobe_path, &Self::probe_args(source))
            .await
            .map_err(|e| match e {
                // A file ffprobe cannot read is bad input, not a unit failure
                VidxError::Media(msg) => VidxError::Validation(msg),
                other => other,
            })?;
        let info = parse_probe_output(&String::from_utf8_lossy(&stdout), size)?;

        tracing::debug!(
            source = %source.display(),
            duration = info.duration_seconds,
            width = info.width,
            height = info.height,
            has_audio = info.has_audio,
            "Probed video"
        );
        Ok(info)
    }

    async fn extract_frames(
        &self,
        source: &Path,
        info: &MediaInfo,
        interval: f64,
        out_dir: &Path,
        progress: Option<watch::Sender<f32>>,
    ) -> Result<FrameSequence> {
        if !(interval > 0.0) {
            return Err(VidxError::Validation(format!(
                "Frame interval must be positive, got {interval}"
            )));
        }
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| VidxError::Media(format!("Failed to create frame dir: {e}")))?;

        let args = Self::frame_args(source, interval, out_dir);
        let mut child = Self::command(&self.config.ffmpeg_path, &args)
            .spawn()
            .map_err(|e| {
                VidxError::Configuration(format!(
                    "Failed to run {}: {e}",
                    self.config.ffmpeg_path
                ))
            })?;

        if let (Some(tx), Some(stdout)) = (progress, child.stdout.take()) {
            let duration = info.duration_seconds;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut current_time = 0.0f64;
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(value) = line.strip_prefix("out_time_ms=") {
                        // Despite the name, ffmpeg reports microseconds here
                        let micros: f64 = value.trim().parse().unwrap_or(0.0);
                        current_time = micros / 1_000_000.0;
                    } else if line.starts_with("progress=") {
                        let fraction = if duration > 0.0 {
                            (current_time / duration).clamp(0.0, 1.0) as f32
                        } else {
                            0.0
                        };
                        if tx.send(fraction).is_err() {
                            break;
                        }
                    }
                }
            });
        }

        let output = tokio::time::timeout(self.config.process_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                VidxError::Validation(format!(
                    "Frame extraction did not finish within {}s",
                    self.config.process_timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| VidxError::Media(format!("ffmpeg frame extraction failed: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VidxError::Validation(format!(
                "Frame extraction failed: {}",
                last_lines(&stderr, 5)
            )));
        }

        let frames = FrameSequence::new(out_dir, info.duration_seconds, interval);
        tracing::debug!(
            source = %source.display(),
            total = frames.total(),
            interval,
            "Extracted frames"
        );
        Ok(frames)
    }

    async fn extract_audio(
        &self,
        source: &Path,
        info: &MediaInfo,
        out_dir: &Path,
    ) -> Result<Option<AudioTrack>> {
        if !info.has_audio {
            return Ok(None);
        }
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| VidxError::Media(format!("Failed to create audio dir: {e}")))?;

        let dest = out_dir.join("audio.wav");
        self.run(&self.config.ffmpeg_path, &Self::audio_args(source, &dest))
            .await?;

        let size = tokio::fs::metadata(&dest).await.map(|m| m.len()).unwrap_or(0);
        // WAV header only: the stream decoded to nothing
        if size <= 44 {
            tracing::debug!(source = %source.display(), "Audio stream is empty");
            return Ok(None);
        }
        Ok(Some(AudioTrack { path: dest }))
    }

    async fn thumbnail(&self, frame: &Frame, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VidxError::Media(format!("Failed to create thumbnail dir: {e}")))?;
        }
        self.run(
            &self.config.ffmpeg_path,
            &self.thumbnail_args(&frame.image_path, dest),
        )
        .await?;
        Ok(())
    }

    async fn is_available(&self) -> bool {
        let version = vec!["-version".to_string()];
        self.run(&self.config.ffmpeg_path, &version).await.is_ok()
            && self.run(&self.config.ffprobe_path, &version).await.is_ok()
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Tail of a tool's stderr, which is where ffmpeg puts the actual error
fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join(" | ")
}
