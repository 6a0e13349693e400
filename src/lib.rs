pub mod capture;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{FrameBuffer, PixelFormat};
pub use error::{ConfigError, FrameError, PipelineError, SinkError};
pub use pipeline::{ChannelSink, FrameOutcome, FrameSink, FusionPipeline, PipelineState};

/// Environment override prefix, e.g. `TF_FUSION__BLEND_WEIGHT=0.5`
pub const ENV_PREFIX: &str = "TF";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fusion: FusionConfig,
    pub demo: DemoConfig,
    pub logging: LoggingConfig,
}

/// Parameters of one fusion session. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Share of the secondary stream in the output, 0.0 to 1.0
    pub blend_weight: f64,
    /// Largest primary/secondary capture-time gap still considered fresh
    pub staleness_threshold_ns: i64,
    pub output_width: u32,
    pub output_height: u32,
    pub output_fps: u32,
    /// Channel layout both sources deliver
    pub pixel_format: PixelFormat,
}

/// Synthetic sources driven by the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub primary_width: u32,
    pub primary_height: u32,
    pub secondary_width: u32,
    pub secondary_height: u32,
    pub secondary_fps: u32,
    /// Stop the secondary source after this many seconds to exercise staleness
    pub secondary_dropout_secs: Option<u64>,
    /// Session length; 0 runs until Ctrl-C
    pub run_secs: u64,
    pub sink_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            blend_weight: 0.35,
            staleness_threshold_ns: 50_000_000, // 50ms
            output_width: 1280,
            output_height: 720,
            output_fps: 30,
            pixel_format: PixelFormat::Bgr24,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            primary_width: 1280,
            primary_height: 720,
            // Lepton-class thermal core
            secondary_width: 160,
            secondary_height: 120,
            secondary_fps: 9,
            secondary_dropout_secs: None,
            run_secs: 0,
            sink_capacity: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "thermal_fusion=info".into(),
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.blend_weight) {
            return Err(ConfigError::BlendWeight(self.blend_weight));
        }
        if self.output_width == 0
            || self.output_height == 0
            || FrameBuffer::buffer_len(self.output_width, self.output_height).is_none()
        {
            return Err(ConfigError::Geometry {
                width: self.output_width,
                height: self.output_height,
            });
        }
        if self.output_fps == 0 {
            return Err(ConfigError::Fps);
        }
        if self.staleness_threshold_ns < 0 {
            return Err(ConfigError::Staleness(self.staleness_threshold_ns));
        }
        Ok(())
    }

    /// Staleness threshold as an unsigned gap; negative values read as zero.
    pub fn staleness_threshold(&self) -> u64 {
        self.staleness_threshold_ns.max(0) as u64
    }
}

impl Config {
    /// Defaults, overlaid with the TOML file at `path` if given, then with
    /// `TF_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Config>()?;

        config.fusion.validate()?;
        Ok(config)
    }
}
