//! Resize, cross-dissolve and staleness marking of one primary/secondary pair

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use tracing::trace;

use crate::capture::frame::{FrameBuffer, PixelFormat};
use crate::FusionConfig;

/// Marker drawn on frames whose secondary contribution is stale
pub const STALE_MARKER: &str = "TH STALE";

/// Result of one composition
#[derive(Debug, Clone)]
pub struct Composite {
    pub frame: FrameBuffer,
    /// A secondary frame was mixed in
    pub blended: bool,
    /// The secondary frame lagged beyond the staleness threshold
    pub stale: bool,
}

/// Blends the primary stream with the latest secondary frame.
///
/// Holds only immutable session parameters, so one instance can be shared
/// by any number of callers.
#[derive(Debug, Clone)]
pub struct Compositor {
    width: u32,
    height: u32,
    blend_weight: f32,
    staleness_threshold_ns: u64,
}

/// Whether two capture times are further apart than `threshold_ns`.
///
/// A gap of exactly the threshold is still fresh.
pub fn is_stale(primary_ts: u64, secondary_ts: u64, threshold_ns: u64) -> bool {
    primary_ts.abs_diff(secondary_ts) > threshold_ns
}

impl Compositor {
    /// Build from a validated config.
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            width: config.output_width,
            height: config.output_height,
            blend_weight: config.blend_weight as f32,
            staleness_threshold_ns: config.staleness_threshold(),
        }
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Compose one output frame. The output carries the primary's timestamp
    /// and channel order.
    pub fn compose(&self, primary: &FrameBuffer, secondary: Option<&FrameBuffer>) -> Composite {
        let format = primary.format();
        let timestamp_ns = primary.timestamp_ns();

        let Some(secondary) = secondary else {
            let frame = if self.matches_output(primary) {
                primary.clone()
            } else {
                let pixels = self.fit(primary, format).into_owned();
                FrameBuffer::from_parts(pixels, self.width, self.height, format, timestamp_ns)
            };
            return Composite {
                frame,
                blended: false,
                stale: false,
            };
        };

        let base = self.fit(primary, format);
        let overlay = self.fit(secondary, format);

        let a = self.blend_weight;
        let mut pixels: Vec<u8> = base
            .iter()
            .zip(overlay.iter())
            .map(|(&p, &s)| ((1.0 - a) * p as f32 + a * s as f32).round_ties_even() as u8)
            .collect();

        let stale = is_stale(
            timestamp_ns,
            secondary.timestamp_ns(),
            self.staleness_threshold_ns,
        );
        if stale {
            trace!(
                gap_ns = timestamp_ns.abs_diff(secondary.timestamp_ns()),
                "secondary frame stale"
            );
            draw_marker(&mut pixels, self.width, self.height, format);
        }

        Composite {
            frame: FrameBuffer::from_parts(pixels, self.width, self.height, format, timestamp_ns),
            blended: true,
            stale,
        }
    }

    fn matches_output(&self, frame: &FrameBuffer) -> bool {
        frame.width() == self.width && frame.height() == self.height
    }

    /// Pixels of `frame` at output geometry in `format` channel order.
    fn fit<'a>(&self, frame: &'a FrameBuffer, format: PixelFormat) -> Cow<'a, [u8]> {
        let mut pixels = if self.matches_output(frame) {
            Cow::Borrowed(frame.pixels())
        } else {
            // Triangle is the bilinear kernel
            let resized =
                imageops::resize(&frame.as_image(), self.width, self.height, FilterType::Triangle);
            Cow::Owned(resized.into_raw())
        };

        if frame.format() != format {
            pixels
                .to_mut()
                .chunks_exact_mut(PixelFormat::BYTES_PER_PIXEL)
                .for_each(|px| px.swap(0, 2));
        }
        pixels
    }
}

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;

/// 5x7 bitmaps for the marker text, one row per byte, MSB on the left.
fn glyph(c: char) -> [u8; 7] {
    match c {
        'T' => [0x1f, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'H' => [0x11, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'S' => [0x0f, 0x10, 0x10, 0x0e, 0x01, 0x01, 0x1e],
        'A' => [0x0e, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1f],
        'E' => [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x1f],
        _ => [0; 7],
    }
}

/// Stamp [`STALE_MARKER`] in red with its baseline at (20, 40), scaled to
/// frame height and clipped to the frame.
fn draw_marker(pixels: &mut [u8], width: u32, height: u32, format: PixelFormat) {
    let red = format.encode_rgb([255, 0, 0]);
    let scale = (height / 240).max(1);
    let top = 40u32.saturating_sub(GLYPH_H * scale);

    for (i, c) in STALE_MARKER.chars().enumerate() {
        let left = 20 + i as u32 * (GLYPH_W + 1) * scale;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = left + col * scale + dx;
                        let y = top + row as u32 * scale + dy;
                        if x >= width || y >= height {
                            continue;
                        }
                        let at = (y as usize * width as usize + x as usize)
                            * PixelFormat::BYTES_PER_PIXEL;
                        pixels[at..at + PixelFormat::BYTES_PER_PIXEL].copy_from_slice(&red);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32, alpha: f64, threshold_ns: i64) -> FusionConfig {
        FusionConfig {
            blend_weight: alpha,
            staleness_threshold_ns: threshold_ns,
            output_width: width,
            output_height: height,
            ..FusionConfig::default()
        }
    }

    fn solid(w: u32, h: u32, rgb: [u8; 3], ts: u64) -> FrameBuffer {
        FrameBuffer::filled(w, h, PixelFormat::Rgb24, rgb, ts).unwrap()
    }

    #[test]
    fn passes_primary_through_without_secondary() {
        let compositor = Compositor::new(&config(8, 6, 0.5, 0));
        let primary = solid(8, 6, [12, 34, 56], 99);

        let out = compositor.compose(&primary, None);
        assert!(!out.blended);
        assert!(!out.stale);
        assert_eq!(out.frame, primary);
    }

    #[test]
    fn pass_through_resizes_to_output_geometry() {
        let compositor = Compositor::new(&config(16, 12, 0.5, 0));
        let mut src = crate::capture::SyntheticSource::new(
            40,
            30,
            PixelFormat::Rgb24,
            crate::capture::Pattern::Gradient,
        );
        let primary = src.capture_frame(5).unwrap();

        let out = compositor.compose(&primary, None);
        let expected = imageops::resize(&primary.as_image(), 16, 12, FilterType::Triangle);
        assert_eq!((out.frame.width(), out.frame.height()), (16, 12));
        assert_eq!(out.frame.pixels(), expected.as_raw().as_slice());
        assert_eq!(out.frame.timestamp_ns(), 5);
    }

    #[test]
    fn half_weight_averages_channels() {
        let compositor = Compositor::new(&config(4, 4, 0.5, 1_000));
        let a = solid(4, 4, [200, 100, 0], 0);
        let b = solid(4, 4, [100, 50, 255], 0);

        let out = compositor.compose(&a, Some(&b));
        assert!(out.blended);
        for px in out.frame.pixels().chunks_exact(3) {
            assert_eq!(px, &[150, 75, 128]);
        }
    }

    #[test]
    fn half_way_blends_round_to_even() {
        let compositor = Compositor::new(&config(4, 4, 0.5, 1_000));
        let odd = solid(4, 4, [1, 3, 5], 0);
        let black = solid(4, 4, [0, 0, 0], 0);

        let out = compositor.compose(&odd, Some(&black));
        for px in out.frame.pixels().chunks_exact(3) {
            assert_eq!(px, &[0, 2, 2]);
        }
    }

    #[test]
    fn weight_extremes_select_one_input() {
        let a = solid(4, 4, [10, 20, 30], 0);
        let b = solid(4, 4, [200, 210, 220], 0);

        let out = Compositor::new(&config(4, 4, 0.0, 0)).compose(&a, Some(&b));
        assert_eq!(out.frame.pixels(), a.pixels());

        let out = Compositor::new(&config(4, 4, 1.0, 0)).compose(&a, Some(&b));
        assert_eq!(out.frame.pixels(), b.pixels());
    }

    #[test]
    fn secondary_is_upscaled_before_blending() {
        let compositor = Compositor::new(&config(32, 24, 0.5, 0));
        let primary = solid(32, 24, [0, 0, 0], 0);
        let thermal = solid(8, 6, [200, 200, 200], 0);

        let out = compositor.compose(&primary, Some(&thermal));
        assert_eq!(Some(out.frame.pixels().len()), FrameBuffer::buffer_len(32, 24));
        for &v in out.frame.pixels() {
            assert!((99..=101).contains(&v), "unexpected channel value {v}");
        }
    }

    #[test]
    fn secondary_channel_order_is_normalized() {
        let compositor = Compositor::new(&config(2, 2, 1.0, 0));
        let primary = solid(2, 2, [0, 0, 0], 0);
        let thermal = FrameBuffer::filled(2, 2, PixelFormat::Bgr24, [255, 0, 0], 0).unwrap();

        let out = compositor.compose(&primary, Some(&thermal));
        assert_eq!(out.frame.format(), PixelFormat::Rgb24);
        assert_eq!(out.frame.pixel(1, 1), Some([255, 0, 0]));
    }

    #[test]
    fn staleness_boundary_is_strict() {
        assert!(!is_stale(1_050, 1_000, 50));
        assert!(is_stale(1_051, 1_000, 50));
        assert!(is_stale(1_000, 1_051, 50));
        assert!(!is_stale(7, 7, 0));

        let compositor = Compositor::new(&config(4, 4, 0.5, 50));
        let secondary = solid(4, 4, [0, 0, 255], 1_000);
        assert!(!compositor.compose(&solid(4, 4, [255, 0, 0], 1_050), Some(&secondary)).stale);
        assert!(compositor.compose(&solid(4, 4, [255, 0, 0], 1_051), Some(&secondary)).stale);
    }

    #[test]
    fn stale_frames_carry_a_visible_marker() {
        let compositor = Compositor::new(&config(96, 48, 0.5, 0));
        let primary = solid(96, 48, [0, 0, 0], 10);
        let secondary = solid(96, 48, [0, 0, 0], 0);

        let out = compositor.compose(&primary, Some(&secondary));
        assert!(out.stale);
        // top bar of the leading 'T'
        assert_eq!(out.frame.pixel(20, 33), Some([255, 0, 0]));
        // away from the marker the blend is untouched
        assert_eq!(out.frame.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(out.frame.pixel(95, 47), Some([0, 0, 0]));
    }

    #[test]
    fn marker_is_clipped_on_tiny_frames() {
        let compositor = Compositor::new(&config(3, 2, 0.5, 0));
        let out = compositor.compose(&solid(3, 2, [1, 2, 3], 10), Some(&solid(3, 2, [1, 2, 3], 0)));
        assert!(out.stale);
        assert_eq!(out.frame.pixels().len(), 18);
    }
}
