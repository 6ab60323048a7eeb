//! # Video Module
//!
//! Frame types, the adaptive scaler, and the source/sink ends of the pipeline.
//! Decoding and container encoding go through external FFmpeg processes
//! exchanging packed RGB24 frames; preview output is JPEG-per-frame.

pub mod backend;
pub mod ffmpeg;
pub mod preview;
pub mod scaler;
pub mod sink;
pub mod source;
pub mod synthetic;
pub mod types;

pub use backend::{FfmpegBackend, MediaBackend};
pub use preview::{PreviewEmitter, PreviewUnit, MULTIPART_BOUNDARY};
pub use scaler::AdaptiveScaler;
pub use sink::{FanoutSink, FfmpegWriter, FrameSink};
pub use source::{FfmpegSource, FrameSource};
pub use synthetic::SyntheticSource;
pub use types::{Frame, Resolution, VideoMetadata};
