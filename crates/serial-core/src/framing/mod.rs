//! Framing module: the bounded byte buffer and the delimiter-driven
//! extraction modes built on top of it.

pub mod buffer;
pub mod mode;

pub use buffer::{BufferError, FrameBuffer};
pub use mode::{ExtractOutcome, FrameDelimiters, FramingMode};
