//! Error types for the fusion core

use thiserror::Error;

/// Rejected session configuration. Fatal to session start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("blend weight must be within [0, 1], got {0}")]
    BlendWeight(f64),

    #[error("output geometry must be non-zero and addressable, got {width}x{height}")]
    Geometry { width: u32, height: u32 },

    #[error("output fps must be non-zero")]
    Fps,

    #[error("staleness threshold must not be negative, got {0} ns")]
    Staleness(i64),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// A single malformed frame. The frame is dropped, the session continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    #[error("frame geometry {width}x{height} is too large to address")]
    TooLarge { width: u32, height: u32 },

    #[error("pixel buffer holds {actual} bytes, {width}x{height} needs {expected}")]
    LengthMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Output sink refused a composed frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("output sink is full")]
    Backpressure,

    #[error("output sink disconnected")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid fusion config: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline is stopped")]
    Stopped,
}
