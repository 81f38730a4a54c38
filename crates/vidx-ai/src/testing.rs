//! Deterministic fake providers for tests
//!
//! - [`HashEmbedder`]: bag-of-words hashing, so texts sharing words are close
//! - [`ScriptedDescriber`]: "describes" a frame by returning its file content
//! - [`StaticTranscriber`]: fixed segments or a fixed failure

use crate::{EmbedPurpose, ImageEmbedder, SceneDescriber, TextEmbedder, Transcriber};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use vidx_core::{ProviderErrorKind, Result, TranscriptSegment, VidxError};

// ============================================================================
// Hash Embedder
// ============================================================================

/// FNV-1a, stable across runs and toolchains
fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Unit-length bag-of-words vector
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension.max(1)];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let slot = (fnv1a(&word.to_lowercase()) % vector.len() as u64) as usize;
        vector[slot] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        vector[0] = 1.0;
    } else {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

/// Text and image embedder backed by [`hash_embedding`]
#[derive(Clone)]
pub struct HashEmbedder {
    declared: usize,
    emitted: usize,
    calls: Arc<AtomicUsize>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            declared: dimension,
            emitted: dimension,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Declare one dimension but return vectors of another
    pub fn emitting(mut self, dimension: usize) -> Self {
        self.emitted = dimension;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextEmbedder for HashEmbedder {
    async fn embed_text(&self, text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_embedding(text, self.emitted))
    }

    fn dimension(&self) -> usize {
        self.declared
    }

    fn name(&self) -> &str {
        "hash"
    }
}

#[async_trait]
impl ImageEmbedder for HashEmbedder {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_embedding(&String::from_utf8_lossy(image), self.emitted))
    }

    fn dimension(&self) -> usize {
        self.declared
    }

    fn name(&self) -> &str {
        "hash"
    }
}

// ============================================================================
// Scripted Describer
// ============================================================================

/// Pause point inside the describer, for cancelling a job mid-run
#[derive(Default)]
pub struct Gate {
    /// Signalled when the gated call starts
    pub reached: Notify,
    /// Lets the gated call continue
    pub resume: Notify,
}

/// Describer that echoes the frame content as its description
#[derive(Clone, Default)]
pub struct ScriptedDescriber {
    failing: Vec<String>,
    failure: Option<ProviderErrorKind>,
    delay: Option<Duration>,
    gate: Option<(usize, Arc<Gate>)>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDescriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content containing `marker` fails with a provider timeout
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.failing.push(marker.into());
        self
    }

    /// Error kind used for failing content (default: timeout)
    pub fn failing_with(mut self, kind: ProviderErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block call number `after` (0-based) until `gate.resume` is notified
    pub fn with_gate(mut self, after: usize, gate: Arc<Gate>) -> Self {
        self.gate = Some((after, gate));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SceneDescriber for ScriptedDescriber {
    async fn describe_scene(&self, image: &[u8]) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((after, gate)) = &self.gate {
            if call == *after {
                gate.reached.notify_one();
                gate.resume.notified().await;
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let text = String::from_utf8_lossy(image).trim().to_string();
        if self.failing.iter().any(|marker| text.contains(marker)) {
            let kind = self.failure.unwrap_or(ProviderErrorKind::Timeout);
            return Err(VidxError::provider(kind, format!("scripted failure on {text}")));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Static Transcriber
// ============================================================================

/// Transcriber returning fixed segments
#[derive(Clone)]
pub struct StaticTranscriber {
    segments: Vec<TranscriptSegment>,
    failure: Option<ProviderErrorKind>,
}

impl StaticTranscriber {
    pub fn new(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            segments,
            failure: None,
        }
    }

    /// Every call fails with `kind`
    pub fn failing(kind: ProviderErrorKind) -> Self {
        Self {
            segments: Vec::new(),
            failure: Some(kind),
        }
    }
}

#[async_trait]
impl Transcriber for StaticTranscriber {
    async fn transcribe(&self, _audio: &Path) -> Result<Vec<TranscriptSegment>> {
        match self.failure {
            Some(kind) => Err(VidxError::provider(kind, "scripted transcription failure")),
            None => Ok(self.segments.clone()),
        }
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hash_embedding_is_normalized_and_stable() {
        let a = hash_embedding("A red car", 128);
        let b = hash_embedding("a RED car", 128);
        assert_eq!(a, b);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
        assert_eq!(hash_embedding("", 8)[0], 1.0);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let query = hash_embedding("red object", 1024);
        let related = hash_embedding("a red car on the street", 1024);
        let unrelated = hash_embedding("an empty room", 1024);
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_gate_pauses_the_gated_call() {
        let gate = Arc::new(Gate::default());
        let describer = ScriptedDescriber::new().with_gate(1, gate.clone());

        assert_eq!(describer.describe_scene(b"first").await.unwrap(), "first");

        let paused = describer.clone();
        let handle = tokio::spawn(async move { paused.describe_scene(b"second").await });
        gate.reached.notified().await;
        assert!(!handle.is_finished());
        gate.resume.notify_one();
        assert_eq!(handle.await.unwrap().unwrap(), "second");
    }
}
