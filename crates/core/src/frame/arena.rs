use std::fs;
use std::path::Path;

use crate::error::{Result, St20Error};

use super::{FrameSink, FrameSource};

/// A flat byte buffer holding whole frames back to back, read or written
/// one frame at a time with wraparound.
///
/// Used as the tx source (usually loaded from a raw video file) and as the
/// rx sink (saved back to a file at the end). Bytes after the last whole
/// frame are kept but never visited.
#[derive(Debug)]
pub struct FrameArena {
    data: Vec<u8>,
    frame_size: usize,
    cursor: usize,
}

impl FrameArena {
    pub fn new(data: Vec<u8>, frame_size: usize) -> Result<Self> {
        if frame_size == 0 {
            return Err(St20Error::ConfigInvalid("frame size is zero".into()));
        }
        if data.len() < frame_size {
            return Err(St20Error::ConfigInvalid(format!(
                "{} bytes cannot hold one {frame_size} byte frame",
                data.len()
            )));
        }
        Ok(Self {
            data,
            frame_size,
            cursor: 0,
        })
    }

    /// A zeroed arena of `frames` frames.
    pub fn with_frames(frames: usize, frame_size: usize) -> Result<Self> {
        if frames == 0 {
            return Err(St20Error::ConfigInvalid("arena needs at least one frame".into()));
        }
        Self::new(vec![0; frames * frame_size], frame_size)
    }

    /// Read a raw video file.
    pub fn load(path: impl AsRef<Path>, frame_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let arena = Self::new(data, frame_size)?;
        let tail = arena.data.len() % frame_size;
        tracing::info!(
            path = %path.display(),
            frames = arena.frame_count(),
            "frame source loaded"
        );
        if tail != 0 {
            tracing::debug!(tail, "ignoring bytes after the last whole frame");
        }
        Ok(arena)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, &self.data)?;
        tracing::info!(path = %path.display(), bytes = self.data.len(), "frame sink saved");
        Ok(())
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Whole frames in the arena.
    pub fn frame_count(&self) -> usize {
        self.data.len() / self.frame_size
    }

    /// Byte offset of the current frame.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn frame_at(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.frame_size)?;
        self.data.get(start..start.checked_add(self.frame_size)?)
    }

    /// Copy the current frame out and move on: the next contiguous span,
    /// wrapping to the start when the remaining bytes cannot hold a frame.
    pub fn copy_next(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.frame_size);
        dest[..n].copy_from_slice(&self.current()[..n]);
        self.advance();
        n
    }

    /// Copy `src` into the current frame and move on.
    pub fn store_next(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.frame_size);
        self.current_mut()[..n].copy_from_slice(&src[..n]);
        self.advance();
        n
    }

    fn current(&self) -> &[u8] {
        &self.data[self.cursor..self.cursor + self.frame_size]
    }

    fn current_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.cursor..self.cursor + self.frame_size]
    }

    fn advance(&mut self) {
        self.cursor += self.frame_size;
        if self.cursor + self.frame_size > self.data.len() {
            self.cursor = 0;
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl FrameSource for FrameArena {
    fn frame(&self) -> &[u8] {
        self.current()
    }

    fn advance_frame(&mut self) {
        self.advance();
    }
}

impl FrameSink for FrameArena {
    fn frame_mut(&mut self) -> Option<&mut [u8]> {
        Some(self.current_mut())
    }

    fn advance_frame(&mut self) {
        self.advance();
    }
}
