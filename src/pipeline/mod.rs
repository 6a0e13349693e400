pub mod cache;
pub mod compositor;
pub mod fusion;
pub mod sink;

pub use cache::{CacheStats, StreamCache};
pub use compositor::{is_stale, Composite, Compositor};
pub use fusion::{FrameOutcome, FusionPipeline, PipelineState, PipelineStats};
pub use sink::{ChannelSink, FrameSink};
