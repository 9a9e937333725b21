//! Line readiness for slice-level sessions.
//!
//! A slice-level tx producer publishes a slot before the frame is complete
//! and then fills it in steps of `height / 30` lines, bumping the slot's
//! `lines_ready` after each step. The transport only packetizes bytes below
//! `lines_ready * bytes_per_line`.
//!
//! On rx the transport reports `(lines, bytes)` received so far at each
//! slice boundary; [`SliceValidator`] checks the two agree.

use std::ops::Range;

/// Number of steps a frame is produced in.
pub const SLICES_PER_FRAME: u32 = 30;

/// Splits a unit's rows into production steps.
#[derive(Debug, Clone)]
pub struct SliceProducer {
    height: u32,
    step: u32,
    lines: u32,
}

impl SliceProducer {
    pub fn new(height: u32) -> Self {
        Self {
            height,
            step: (height / SLICES_PER_FRAME).max(1),
            lines: 0,
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    /// Lines produced so far in the current unit.
    pub fn lines(&self) -> u32 {
        self.lines
    }

    /// The next range of rows to produce, or `None` once the unit is done.
    pub fn next_slice(&mut self) -> Option<Range<u32>> {
        if self.lines >= self.height {
            return None;
        }
        let start = self.lines;
        self.lines = (start + self.step).min(self.height);
        Some(start..self.lines)
    }

    /// Start the next unit.
    pub fn reset(&mut self) {
        self.lines = 0;
    }
}

/// Progress report for a partially received unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceMeta {
    /// Complete lines received.
    pub recv_lines: u32,
    /// Payload bytes received.
    pub recv_size: usize,
}

/// Consistency check for rx slice notifications.
#[derive(Debug, Clone, Copy)]
pub struct SliceValidator {
    bytes_per_line: usize,
}

impl SliceValidator {
    pub fn new(bytes_per_line: usize) -> Self {
        Self { bytes_per_line }
    }

    /// `true` if `meta.recv_size` covers `meta.recv_lines` full lines.
    ///
    /// A mismatch means packets inside the reported lines were lost. It is
    /// logged and counted by the caller, never treated as an error.
    pub fn check(&self, meta: SliceMeta) -> bool {
        let expected = meta.recv_lines as usize * self.bytes_per_line;
        if meta.recv_size < expected {
            tracing::warn!(
                recv_lines = meta.recv_lines,
                recv_size = meta.recv_size,
                expected,
                "slice size does not cover reported lines"
            );
            return false;
        }
        true
    }
}
