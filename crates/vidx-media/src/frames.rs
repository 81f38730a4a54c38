//! Frame sampling plan and the lazy frame sequence

use std::path::{Path, PathBuf};
use vidx_core::Frame;

/// Number of frames sampled at `k * interval` for `k * interval < duration`
pub fn planned_frame_count(duration: f64, interval: f64) -> u32 {
    if !(duration > 0.0) || !(interval > 0.0) {
        return 0;
    }
    let mut count = (duration / interval).ceil() as u32;
    // Float division can round a boundary up by one
    while count > 0 && f64::from(count - 1) * interval >= duration {
        count -= 1;
    }
    count
}

/// ffmpeg numbers its output images from 1
pub fn frame_file_name(index: u32) -> String {
    format!("frame_{:06}.jpg", index + 1)
}

/// Finite, ordered, consuming sequence of sampled frames.
///
/// Frames are produced on demand from the sampling plan, so no image is held
/// in memory. A frame whose file is missing is still yielded; reading it is
/// the consumer's job and a failure there counts as a lost frame.
#[derive(Debug)]
pub struct FrameSequence {
    dir: PathBuf,
    interval: f64,
    total: u32,
    next: u32,
}

impl FrameSequence {
    pub fn new(dir: impl Into<PathBuf>, duration: f64, interval: f64) -> Self {
        Self {
            dir: dir.into(),
            interval,
            total: planned_frame_count(duration, interval),
            next: 0,
        }
    }

    /// Frames planned for the whole video
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Frames not yet yielded
    pub fn remaining(&self) -> u32 {
        self.total - self.next
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Take up to `size` frames
    pub fn next_batch(&mut self, size: usize) -> Vec<Frame> {
        self.by_ref().take(size.max(1)).collect()
    }
}

impl Iterator for FrameSequence {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(Frame {
            index,
            timestamp: f64::from(index) * self.interval,
            image_path: self.dir.join(frame_file_name(index)),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining() as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameSequence {}
