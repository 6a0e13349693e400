//! Synthetic frame sources for running a fusion session without hardware

use tracing::instrument;

use crate::capture::frame::{FrameBuffer, PixelFormat};
use crate::error::FrameError;

/// Test pattern produced by a [`SyntheticSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Diagonal gradient scrolling one step per frame
    Gradient,
    /// Dark field with a warm spot orbiting the centre
    HotSpot,
}

/// Produces frames of a fixed geometry, one per call
pub struct SyntheticSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    pattern: Pattern,
    sequence: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, format: PixelFormat, pattern: Pattern) -> Self {
        Self {
            width,
            height,
            format,
            pattern,
            sequence: 0,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Render the next frame, stamped with `timestamp_ns`.
    #[instrument(level = "trace", skip(self), fields(pattern = ?self.pattern))]
    pub fn capture_frame(&mut self, timestamp_ns: u64) -> Result<FrameBuffer, FrameError> {
        self.sequence += 1;

        let (w, h) = (self.width as usize, self.height as usize);
        let capacity = FrameBuffer::buffer_len(self.width, self.height).unwrap_or(0);
        let mut pixels = Vec::with_capacity(capacity);
        let shift = self.sequence as usize;

        // Hot spot centre orbits on a coarse 16-step circle
        let angle = (self.sequence % 16) as f32 * std::f32::consts::TAU / 16.0;
        let cx = w as f32 / 2.0 + angle.cos() * w as f32 / 4.0;
        let cy = h as f32 / 2.0 + angle.sin() * h as f32 / 4.0;
        let radius = (w.min(h) as f32 / 5.0).max(1.0);

        for y in 0..h {
            for x in 0..w {
                let rgb = match self.pattern {
                    Pattern::Gradient => {
                        let span = (w + h).max(1);
                        let v = ((x + y + shift) % span * 255 / span) as u8;
                        [v, v / 2, 255 - v]
                    }
                    Pattern::HotSpot => {
                        let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
                        let heat = (1.0 - d / radius).clamp(0.0, 1.0);
                        [(40.0 + 215.0 * heat) as u8, (200.0 * heat * heat) as u8, 30]
                    }
                };
                pixels.extend_from_slice(&self.format.encode_rgb(rgb));
            }
        }

        FrameBuffer::new(pixels, self.width, self.height, self.format, timestamp_ns)
    }
}
