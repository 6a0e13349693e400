use bytes::Bytes;
use image::{ImageBuffer, Rgb};
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Immutable decoded frame.
///
/// Pixel data lives in a [`Bytes`] buffer, so cloning a frame never copies
/// pixels and no holder can mutate what another holder is reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    pixels: Bytes,
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Monotonic capture time in nanoseconds
    timestamp_ns: u64,
}

/// Packed 3-channel, 8-bit pixel layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// Reorder an `[r, g, b]` triple into this layout.
    pub fn encode_rgb(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            PixelFormat::Rgb24 => rgb,
            PixelFormat::Bgr24 => [rgb[2], rgb[1], rgb[0]],
        }
    }
}

impl FrameBuffer {
    /// Wrap a packed pixel buffer, checking it against the declared geometry.
    pub fn new(
        pixels: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_ns: u64,
    ) -> Result<Self, FrameError> {
        let pixels = pixels.into();
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }

        let expected =
            Self::buffer_len(width, height).ok_or(FrameError::TooLarge { width, height })?;
        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            pixels,
            width,
            height,
            format,
            timestamp_ns,
        })
    }

    /// Frame of a single color, given as `[r, g, b]`.
    pub fn filled(
        width: u32,
        height: u32,
        format: PixelFormat,
        rgb: [u8; 3],
        timestamp_ns: u64,
    ) -> Result<Self, FrameError> {
        if Self::buffer_len(width, height).is_none() {
            return Err(FrameError::TooLarge { width, height });
        }
        let px = format.encode_rgb(rgb);
        let count = width as usize * height as usize;
        let pixels: Vec<u8> = std::iter::repeat(px).take(count).flatten().collect();
        Self::new(pixels, width, height, format, timestamp_ns)
    }

    /// Length in bytes of a packed frame of the given geometry, `None` if it
    /// does not fit in `usize`.
    pub fn buffer_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(PixelFormat::BYTES_PER_PIXEL)
    }

    /// Internal constructor for buffers whose length is already known to match.
    pub(crate) fn from_parts(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_ns: u64,
    ) -> Self {
        debug_assert_eq!(Some(pixels.len()), Self::buffer_len(width, height));
        Self {
            pixels: Bytes::from(pixels),
            width,
            height,
            format,
            timestamp_ns,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Release the pixel buffer, e.g. to hand it to an encoder.
    pub fn into_pixels(self) -> Bytes {
        self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Pixel at `(x, y)` in the frame's own channel order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * PixelFormat::BYTES_PER_PIXEL;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    /// Borrowed image view for the resampling routines.
    ///
    /// Channel order is whatever the frame carries; resampling treats the
    /// three channels independently so the `Rgb` tag is only nominal.
    pub(crate) fn as_image(&self) -> ImageBuffer<Rgb<u8>, &[u8]> {
        ImageBuffer::from_raw(self.width, self.height, &self.pixels[..])
            .expect("frame length is validated at construction")
    }
}
