//! Accumulates DMA chunk fills into fixed-length frames.
//!
//! The capture hardware produces chunks of whatever size the DMA ring
//! was configured with; the wire wants frames of exactly
//! [`SAMPLES_PER_FRAME`](crate::SAMPLES_PER_FRAME) samples. The
//! assembler owns nothing: it fills a caller-provided frame buffer in
//! place, so the one frame-sized scratch region of the device is
//! allocated exactly once and reused every cycle.

use crate::Sample;

pub struct FrameAssembler<'a> {
    frame: &'a mut [Sample],
    filled: usize,
    /// Zero-length fills seen. A zero-length chunk from the driver is
    /// a transient fault; it must never surface as a truncated frame.
    short_reads: u32,
}

impl<'a> FrameAssembler<'a> {
    pub fn new(frame: &'a mut [Sample]) -> Self {
        Self {
            frame,
            filled: 0,
            short_reads: 0,
        }
    }

    /// Samples still missing from the current frame.
    pub fn remaining(&self) -> usize {
        self.frame.len() - self.filled
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.frame.len()
    }

    /// Append a chunk of captured samples, returning how many were
    /// consumed. Consumes at most [`remaining`](Self::remaining); the
    /// caller keeps the rest for the next frame. An empty chunk is
    /// counted as a short read and consumes nothing.
    pub fn push(&mut self, chunk: &[Sample]) -> usize {
        if chunk.is_empty() {
            self.short_reads += 1;
            return 0;
        }

        let n = chunk.len().min(self.remaining());
        self.frame[self.filled..self.filled + n].copy_from_slice(&chunk[..n]);
        self.filled += n;
        n
    }

    /// Hand out the completed frame and reset for the next one.
    /// Returns `None` while the frame is still short; a partial frame
    /// is never emitted.
    pub fn take(&mut self) -> Option<&[Sample]> {
        if !self.is_full() {
            return None;
        }
        self.filled = 0;
        Some(self.frame)
    }

    pub fn short_reads(&self) -> u32 {
        self.short_reads
    }
}
