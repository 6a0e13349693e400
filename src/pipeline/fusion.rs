//! Fusion session: ingestion of both streams, composition, output delivery

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use crossbeam::utils::CachePadded;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{FrameError, PipelineError, SinkError};
use crate::pipeline::cache::{CacheStats, StreamCache};
use crate::pipeline::compositor::Compositor;
use crate::pipeline::sink::FrameSink;
use crate::{FrameBuffer, FusionConfig};

/// Lifecycle of a [`FusionPipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    /// No output attached; primary frames are composed and discarded
    Idle = 0,
    /// Composed frames go to the attached sink
    Active = 1,
    /// Terminal; frame arrivals are ignored
    Stopped = 2,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Idle,
            1 => PipelineState::Active,
            _ => PipelineState::Stopped,
        }
    }
}

/// What happened to one primary frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Delivered { stale: bool },
    /// Composed while no output was attached
    Discarded { stale: bool },
    /// Composed but refused by the sink
    Dropped { stale: bool },
    /// Pipeline stopped; nothing was done
    Ignored,
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_composed: usize,
    pub frames_delivered: usize,
    pub frames_discarded: usize,
    pub frames_dropped: usize,
    pub frames_stale: usize,
    pub frames_rejected: usize,
    pub secondary_frames: usize,
    pub cache: CacheStats,
}

#[derive(Default)]
struct Stats {
    frames_composed: AtomicUsize,
    frames_delivered: AtomicUsize,
    frames_discarded: AtomicUsize,
    frames_dropped: AtomicUsize,
    frames_stale: AtomicUsize,
    frames_rejected: AtomicUsize,
    secondary_frames: AtomicUsize,
}

/// Fuses a primary stream with the latest frame of a secondary stream.
///
/// Every method takes `&self`; share the pipeline behind an `Arc` and call
/// `on_primary_frame` / `on_secondary_frame` from any producer thread. The
/// only lock taken is the [`StreamCache`] slot lock, and never across
/// resizing or blending.
pub struct FusionPipeline {
    config: FusionConfig,
    compositor: Compositor,
    cache: StreamCache,
    state: AtomicU8,
    sink: ArcSwapOption<Box<dyn FrameSink>>,
    stats: CachePadded<Stats>,
}

impl FusionPipeline {
    /// Start a session in `Idle`. The config is fixed for the session's lifetime.
    #[instrument(skip(config), fields(
        width = config.output_width,
        height = config.output_height,
        alpha = config.blend_weight,
    ))]
    pub fn new(config: FusionConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        debug!(?config, "fusion config accepted");

        let pipeline = Self {
            compositor: Compositor::new(&config),
            config,
            cache: StreamCache::new(),
            state: AtomicU8::new(PipelineState::Idle as u8),
            sink: ArcSwapOption::empty(),
            stats: CachePadded::new(Stats::default()),
        };
        info!("Fusion pipeline created");
        Ok(pipeline)
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn cache(&self) -> &StreamCache {
        &self.cache
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attach the output consumer, moving `Idle` to `Active`.
    ///
    /// Attaching while `Active` replaces the previous sink.
    #[instrument(skip(self, sink))]
    pub fn attach_output<S>(&self, sink: S) -> Result<(), PipelineError>
    where
        S: FrameSink + 'static,
    {
        if self.state() == PipelineState::Stopped {
            return Err(PipelineError::Stopped);
        }

        let sink: Box<dyn FrameSink> = Box::new(sink);
        self.sink.store(Some(Arc::new(sink)));

        match self.state.compare_exchange(
            PipelineState::Idle as u8,
            PipelineState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                info!("Output attached, pipeline active");
                Ok(())
            }
            Err(s) if PipelineState::from_u8(s) == PipelineState::Active => {
                info!("Output sink replaced");
                Ok(())
            }
            Err(_) => {
                // stop() won the race
                self.sink.store(None);
                Err(PipelineError::Stopped)
            }
        }
    }

    /// Ingest a secondary frame. Only updates the cache.
    pub fn on_secondary_frame(
        &self,
        pixels: impl Into<Bytes>,
        width: u32,
        height: u32,
        timestamp_ns: u64,
    ) -> Result<(), FrameError> {
        if self.state() == PipelineState::Stopped {
            return Ok(());
        }

        let frame = self.admit("secondary", pixels, width, height, timestamp_ns)?;
        self.cache.put(frame);

        self.stats.secondary_frames.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fusion_secondary_frames").increment(1);
        trace!(timestamp_ns, "secondary frame cached");
        Ok(())
    }

    /// Ingest a primary frame: compose it with the cached secondary frame and
    /// hand the result to the sink if one is attached.
    pub fn on_primary_frame(
        &self,
        pixels: impl Into<Bytes>,
        width: u32,
        height: u32,
        timestamp_ns: u64,
    ) -> Result<FrameOutcome, FrameError> {
        if self.state() == PipelineState::Stopped {
            return Ok(FrameOutcome::Ignored);
        }

        let frame = self.admit("primary", pixels, width, height, timestamp_ns)?;
        let secondary = self.cache.get();

        let started = Instant::now();
        let composite = self.compositor.compose(&frame, secondary.as_deref());
        metrics::histogram!("fusion_compose_time_us").record(started.elapsed().as_micros() as f64);

        self.stats.frames_composed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fusion_frames_composed").increment(1);
        let stale = composite.stale;
        if stale {
            self.stats.frames_stale.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("fusion_frames_stale").increment(1);
        }

        let sink = match self.state() {
            PipelineState::Stopped => return Ok(FrameOutcome::Ignored),
            PipelineState::Idle => None,
            PipelineState::Active => self.sink.load_full(),
        };
        let Some(sink) = sink else {
            self.stats.frames_discarded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("fusion_frames_discarded").increment(1);
            trace!(timestamp_ns, "no output attached, composite discarded");
            return Ok(FrameOutcome::Discarded { stale });
        };

        match sink.deliver(composite.frame) {
            Ok(()) => {
                self.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("fusion_frames_delivered").increment(1);
                trace!(timestamp_ns, stale, "composite delivered");
                Ok(FrameOutcome::Delivered { stale })
            }
            Err(e) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("fusion_frames_dropped").increment(1);
                match e {
                    SinkError::Backpressure => debug!(timestamp_ns, "output sink full, frame dropped"),
                    SinkError::Disconnected => warn!(timestamp_ns, "output sink disconnected, frame dropped"),
                }
                Ok(FrameOutcome::Dropped { stale })
            }
        }
    }

    /// Enter the terminal `Stopped` state and release the sink.
    ///
    /// Safe to call concurrently with frame arrivals; calls already past the
    /// state check finish normally.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let previous = self
            .state
            .swap(PipelineState::Stopped as u8, Ordering::AcqRel);
        if PipelineState::from_u8(previous) != PipelineState::Stopped {
            self.sink.store(None);
            info!(from = ?PipelineState::from_u8(previous), "Fusion pipeline stopped");
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_composed: self.stats.frames_composed.load(Ordering::Relaxed),
            frames_delivered: self.stats.frames_delivered.load(Ordering::Relaxed),
            frames_discarded: self.stats.frames_discarded.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            frames_stale: self.stats.frames_stale.load(Ordering::Relaxed),
            frames_rejected: self.stats.frames_rejected.load(Ordering::Relaxed),
            secondary_frames: self.stats.secondary_frames.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }

    fn admit(
        &self,
        stream: &'static str,
        pixels: impl Into<Bytes>,
        width: u32,
        height: u32,
        timestamp_ns: u64,
    ) -> Result<FrameBuffer, FrameError> {
        FrameBuffer::new(pixels, width, height, self.config.pixel_format, timestamp_ns).map_err(
            |e| {
                self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("fusion_frames_rejected").increment(1);
                warn!(stream, error = %e, "rejected malformed frame");
                e
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::pipeline::sink::ChannelSink;
    use crate::PixelFormat;

    fn config() -> FusionConfig {
        FusionConfig {
            blend_weight: 0.5,
            staleness_threshold_ns: 50,
            output_width: 4,
            output_height: 4,
            output_fps: 30,
            pixel_format: PixelFormat::Rgb24,
        }
    }

    fn solid(rgb: [u8; 3]) -> Vec<u8> {
        FrameBuffer::filled(4, 4, PixelFormat::Rgb24, rgb, 0)
            .unwrap()
            .pixels()
            .to_vec()
    }

    #[test]
    fn rejects_invalid_config() {
        let err = FusionPipeline::new(FusionConfig {
            blend_weight: 1.5,
            ..config()
        })
        .err()
        .unwrap();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::BlendWeight(_))
        ));
    }

    #[test]
    fn starts_idle_and_discards() {
        let pipeline = FusionPipeline::new(config()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);

        let outcome = pipeline.on_primary_frame(solid([1, 2, 3]), 4, 4, 0).unwrap();
        assert_eq!(outcome, FrameOutcome::Discarded { stale: false });

        let stats = pipeline.stats();
        assert_eq!(stats.frames_composed, 1);
        assert_eq!(stats.frames_discarded, 1);
        assert_eq!(stats.frames_delivered, 0);
    }

    #[test]
    fn secondary_frames_only_fill_cache() {
        let pipeline = FusionPipeline::new(config()).unwrap();
        let (sink, rx) = ChannelSink::bounded(4);
        pipeline.attach_output(sink).unwrap();

        pipeline.on_secondary_frame(solid([0, 0, 255]), 4, 4, 10).unwrap();
        assert!(rx.is_empty());
        assert_eq!(pipeline.cache().get().unwrap().timestamp_ns(), 10);
        assert_eq!(pipeline.stats().frames_composed, 0);
    }

    #[test]
    fn malformed_frame_is_rejected_and_session_survives() {
        let pipeline = FusionPipeline::new(config()).unwrap();
        let (sink, rx) = ChannelSink::bounded(4);
        pipeline.attach_output(sink).unwrap();

        let err = pipeline.on_primary_frame(vec![0u8; 5], 4, 4, 0).unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { .. }));
        assert!(pipeline.on_secondary_frame(vec![0u8; 48], 0, 4, 0).is_err());
        assert!(pipeline.cache().is_empty());

        let outcome = pipeline.on_primary_frame(solid([9, 9, 9]), 4, 4, 1).unwrap();
        assert_eq!(outcome, FrameOutcome::Delivered { stale: false });
        assert_eq!(rx.try_recv().unwrap().timestamp_ns(), 1);
        assert_eq!(pipeline.stats().frames_rejected, 2);
    }

    #[test]
    fn oversized_geometry_is_rejected_without_panicking() {
        let pipeline = FusionPipeline::new(config()).unwrap();
        let (sink, rx) = ChannelSink::bounded(4);
        pipeline.attach_output(sink).unwrap();

        let err = pipeline
            .on_primary_frame(vec![0u8; 12], u32::MAX, u32::MAX, 0)
            .unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
        assert!(pipeline
            .on_secondary_frame(vec![0u8; 12], u32::MAX, u32::MAX, 0)
            .is_err());
        assert!(pipeline.cache().is_empty());

        // the session keeps working
        assert_eq!(
            pipeline.on_primary_frame(solid([1, 1, 1]), 4, 4, 2).unwrap(),
            FrameOutcome::Delivered { stale: false }
        );
        assert_eq!(rx.len(), 1);
        assert_eq!(pipeline.stats().frames_rejected, 2);
    }

    #[test]
    fn full_sink_drops_without_error() {
        let pipeline = FusionPipeline::new(config()).unwrap();
        let (sink, _rx) = ChannelSink::bounded(1);
        pipeline.attach_output(sink).unwrap();

        assert_eq!(
            pipeline.on_primary_frame(solid([0; 3]), 4, 4, 0).unwrap(),
            FrameOutcome::Delivered { stale: false }
        );
        assert_eq!(
            pipeline.on_primary_frame(solid([0; 3]), 4, 4, 1).unwrap(),
            FrameOutcome::Dropped { stale: false }
        );
        assert_eq!(pipeline.stats().frames_dropped, 1);
    }

    #[test]
    fn reattach_replaces_sink() {
        let pipeline = FusionPipeline::new(config()).unwrap();
        let (first, first_rx) = ChannelSink::bounded(4);
        let (second, second_rx) = ChannelSink::bounded(4);

        pipeline.attach_output(first).unwrap();
        pipeline.attach_output(second).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Active);

        pipeline.on_primary_frame(solid([0; 3]), 4, 4, 0).unwrap();
        assert!(first_rx.is_empty());
        assert_eq!(second_rx.len(), 1);
    }

    #[test]
    fn stop_is_terminal() {
        let pipeline = FusionPipeline::new(config()).unwrap();
        pipeline.stop();
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        let (sink, _rx) = ChannelSink::bounded(1);
        assert!(matches!(
            pipeline.attach_output(sink),
            Err(PipelineError::Stopped)
        ));
        // stopped pipelines ignore input without validating it
        assert_eq!(
            pipeline.on_primary_frame(vec![0u8; 1], 4, 4, 0).unwrap(),
            FrameOutcome::Ignored
        );
        assert!(pipeline.on_secondary_frame(vec![0u8; 1], 4, 4, 0).is_ok());
        assert_eq!(pipeline.stats(), PipelineStats::default());
    }
}
