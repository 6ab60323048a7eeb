use std::path::Path;

use crate::config::OutputConfig;
use crate::error::Result;
use crate::video::sink::{FfmpegWriter, FrameSink};
use crate::video::source::{FfmpegSource, FrameSource};
use crate::video::types::Resolution;

/// Opens decode and encode handles for sessions.
///
/// Sessions never construct sources or container writers themselves, so the
/// decoding stack can be swapped (or faked in tests) in one place.
pub trait MediaBackend: Send + Sync {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn open_writer(
        &self,
        path: &Path,
        resolution: Resolution,
        fps: f64,
        config: &OutputConfig,
    ) -> Result<Box<dyn FrameSink>>;
}

/// Backend driving external `ffprobe`/`ffmpeg` processes
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }

    fn open_writer(
        &self,
        path: &Path,
        resolution: Resolution,
        fps: f64,
        config: &OutputConfig,
    ) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegWriter::create(path, resolution, fps, config)?))
    }
}
