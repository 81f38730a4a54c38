//! Scripted decomposer for tests
//!
//! Writes each frame's "image" as a UTF-8 scene text, so fake AI providers
//! downstream can describe or embed a frame by reading its file.

use crate::frames::FrameSequence;
use crate::Decomposer;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use vidx_core::{AudioTrack, Frame, MediaInfo, Result, VidxError};

type SceneFn = Arc<dyn Fn(f64) -> String + Send + Sync>;

/// Decomposer that fabricates media from a script instead of a real file
#[derive(Clone)]
pub struct ScriptedDecomposer {
    duration: f64,
    has_audio: bool,
    scene: SceneFn,
    missing_frames: HashSet<u32>,
    probe_error: Option<String>,
}

impl ScriptedDecomposer {
    /// Every frame shows the same generic scene
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            has_audio: false,
            scene: Arc::new(|_| "an empty room".to_string()),
            missing_frames: HashSet::new(),
            probe_error: None,
        }
    }

    pub fn with_audio(mut self, has_audio: bool) -> Self {
        self.has_audio = has_audio;
        self
    }

    /// Scene text for the frame at a timestamp
    pub fn with_scene(mut self, scene: impl Fn(f64) -> String + Send + Sync + 'static) -> Self {
        self.scene = Arc::new(scene);
        self
    }

    /// Frames whose image file is never written
    pub fn with_missing_frames(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.missing_frames = indices.into_iter().collect();
        self
    }

    /// Probe rejects the file as invalid input
    pub fn with_probe_error(mut self, message: impl Into<String>) -> Self {
        self.probe_error = Some(message.into());
        self
    }
}

#[async_trait]
impl Decomposer for ScriptedDecomposer {
    async fn probe(&self, _source: &Path) -> Result<MediaInfo> {
        if let Some(message) = &self.probe_error {
            return Err(VidxError::Validation(message.clone()));
        }
        Ok(MediaInfo {
            duration_seconds: self.duration,
            width: 640,
            height: 360,
            fps: 30.0,
            codec: "h264".to_string(),
            has_audio: self.has_audio,
            size_bytes: 1024,
        })
    }

    async fn extract_frames(
        &self,
        _source: &Path,
        info: &MediaInfo,
        interval: f64,
        out_dir: &Path,
        progress: Option<watch::Sender<f32>>,
    ) -> Result<FrameSequence> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| VidxError::Media(e.to_string()))?;

        let frames = FrameSequence::new(out_dir, info.duration_seconds, interval);
        let total = frames.total().max(1);
        for frame in FrameSequence::new(out_dir, info.duration_seconds, interval) {
            if !self.missing_frames.contains(&frame.index) {
                tokio::fs::write(&frame.image_path, (self.scene)(frame.timestamp))
                    .await
                    .map_err(|e| VidxError::Media(e.to_string()))?;
            }
            if let Some(tx) = &progress {
                let _ = tx.send((frame.index + 1) as f32 / total as f32);
            }
        }
        Ok(frames)
    }

    async fn extract_audio(
        &self,
        _source: &Path,
        info: &MediaInfo,
        out_dir: &Path,
    ) -> Result<Option<AudioTrack>> {
        if !info.has_audio {
            return Ok(None);
        }
        let path = out_dir.join("audio.wav");
        tokio::fs::write(&path, b"RIFF-scripted-audio")
            .await
            .map_err(|e| VidxError::Media(e.to_string()))?;
        Ok(Some(AudioTrack { path }))
    }

    async fn thumbnail(&self, frame: &Frame, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VidxError::Media(e.to_string()))?;
        }
        tokio::fs::copy(&frame.image_path, dest)
            .await
            .map_err(|e| VidxError::Media(format!("Thumbnail failed: {e}")))?;
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_frames_carry_scene_text() {
        let dir = tempfile::tempdir().unwrap();
        let decomposer = ScriptedDecomposer::new(3.0)
            .with_scene(|ts| format!("scene at {ts}"))
            .with_missing_frames([1]);
        let info = decomposer.probe(Path::new("any.mp4")).await.unwrap();
        let (tx, rx) = watch::channel(0.0f32);

        let frames: Vec<Frame> = decomposer
            .extract_frames(Path::new("any.mp4"), &info, 1.0, dir.path(), Some(tx))
            .await
            .unwrap()
            .collect();

        assert_eq!(frames.len(), 3);
        let text = tokio::fs::read_to_string(&frames[2].image_path).await.unwrap();
        assert_eq!(text, "scene at 2");
        assert!(!frames[1].image_path.exists());
        assert_eq!(*rx.borrow(), 1.0);
    }

    #[tokio::test]
    async fn test_scripted_audio_follows_probe() {
        let dir = tempfile::tempdir().unwrap();
        let silent = ScriptedDecomposer::new(2.0);
        let info = silent.probe(Path::new("a.mp4")).await.unwrap();
        assert!(silent
            .extract_audio(Path::new("a.mp4"), &info, dir.path())
            .await
            .unwrap()
            .is_none());

        let talking = ScriptedDecomposer::new(2.0).with_audio(true);
        let info = talking.probe(Path::new("a.mp4")).await.unwrap();
        assert!(talking
            .extract_audio(Path::new("a.mp4"), &info, dir.path())
            .await
            .unwrap()
            .is_some());
    }
}
