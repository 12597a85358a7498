//! Frame reassembly
//!
//! Image bytes arrive spread over many camera-data packets. A packet with
//! the start-of-frame flag closes the frame in progress and opens the next.

use crate::domain::models::Frame;
use crate::infrastructure::bluetooth::protocol::DecodedPacket;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Start of frame with no complete row accumulated")]
    EmptyFrame,
}

/// Counters kept for the lifetime of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_emitted: u64,
    pub empty_frames: u64,
    /// Trailing bytes dropped because they did not fill a row
    pub bytes_discarded: u64,
}

pub struct FrameAssembler {
    width: usize,
    buffer: Vec<u8>,
    stats: FrameStats,
}

impl FrameAssembler {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            buffer: Vec::new(),
            stats: FrameStats::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Bytes of the frame currently in progress
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Feed one decoded packet, returning the frame it completed, if any.
    ///
    /// The previous frame is finalized before this packet's payload is
    /// appended, so the payload becomes the first bytes of the new frame.
    pub fn on_packet(&mut self, decoded: &DecodedPacket<'_>) -> Option<Frame> {
        // A marker on an empty buffer closes nothing
        let frame = if decoded.start_of_frame() && !self.buffer.is_empty() {
            match self.finalize() {
                Ok(frame) => Some(frame),
                Err(FrameError::EmptyFrame) => {
                    trace!("Start of frame with no complete row");
                    None
                }
            }
        } else {
            None
        };

        self.buffer.extend_from_slice(decoded.image_payload);
        frame
    }

    /// Close the frame in progress and clear the buffer.
    ///
    /// An incomplete trailing row is discarded, never carried over.
    fn finalize(&mut self) -> Result<Frame, FrameError> {
        let mut pixels = std::mem::take(&mut self.buffer);
        let extra = pixels.len() % self.width;
        pixels.truncate(pixels.len() - extra);
        self.stats.bytes_discarded += extra as u64;

        let height = pixels.len() / self.width;
        if height == 0 {
            self.stats.empty_frames += 1;
            return Err(FrameError::EmptyFrame);
        }

        self.stats.frames_emitted += 1;
        debug!(
            "Frame complete: {}x{} ({} trailing bytes dropped)",
            self.width, height, extra
        );

        Ok(Frame {
            width: self.width,
            height,
            pixels,
        })
    }

    /// Drop the frame in progress and the counters
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stats = FrameStats::default();
    }
}
