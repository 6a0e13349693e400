pub mod frame;
pub mod source;

pub use frame::FrameBuffer;
pub use frame::PixelFormat;
pub use source::{Pattern, SyntheticSource};
