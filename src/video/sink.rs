use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin};

use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::error::{CamoError, Result, VideoError};
use crate::video::ffmpeg;
use crate::video::types::{Frame, Resolution};

/// Destination for composited frames.
pub trait FrameSink: Send {
    /// Accept the frame produced for `index`
    fn write_frame(&mut self, frame: &Frame, index: u64) -> Result<()>;

    /// Flush and release the sink. The session calls this on every exit path;
    /// implementations must tolerate repeated calls.
    fn close(&mut self) -> Result<()>;
}

/// Appends frames to a video container through an `ffmpeg` encoder process.
pub struct FfmpegWriter {
    path: PathBuf,
    resolution: Resolution,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    frames_written: u64,
}

impl FfmpegWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        resolution: Resolution,
        fps: f64,
        config: &OutputConfig,
    ) -> Result<Self> {
        let path = path.as_ref();

        if resolution.is_empty() {
            return Err(VideoError::InvalidParameters {
                details: format!("cannot encode {} frames", resolution),
            }.into());
        }

        let mut child = ffmpeg::spawn_encoder(path, resolution, fps, config)
            .map_err(|e| VideoError::WriteFailure {
                reason: format!("ffmpeg encoder could not be started: {}", e),
            })?;

        let stdin = child.stdin.take().map(BufWriter::new).ok_or_else(|| VideoError::WriteFailure {
            reason: "ffmpeg encoder has no stdin".to_string(),
        })?;

        info!("Writing {} @ {:.2}fps to {}", resolution, fps, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            resolution,
            child: Some(child),
            stdin: Some(stdin),
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &Frame, index: u64) -> Result<()> {
        if frame.resolution() != self.resolution {
            return Err(VideoError::WriteFailure {
                reason: format!("frame {} is {}, writer expects {}", index, frame.resolution(), self.resolution),
            }.into());
        }

        let stdin = self.stdin.as_mut().ok_or_else(|| VideoError::WriteFailure {
            reason: "writer already closed".to_string(),
        })?;

        stdin.write_all(frame.as_bytes()).map_err(|e| VideoError::WriteFailure {
            reason: format!("encoder rejected frame {}: {}", index, e),
        })?;

        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let flushed = match self.stdin.take() {
            Some(mut stdin) => stdin.flush(),
            None => Ok(()),
        };

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // Dropping stdin above lets ffmpeg see EOF and finalize the container
        let status = child.wait().map_err(|e| VideoError::WriteFailure {
            reason: format!("waiting for encoder: {}", e),
        })?;

        debug!("Encoder for {} exited with {} after {} frames", self.path.display(), status, self.frames_written);

        flushed.map_err(|e| VideoError::WriteFailure {
            reason: format!("flushing encoder input: {}", e),
        })?;

        if !status.success() {
            return Err(VideoError::WriteFailure {
                reason: format!("ffmpeg encoder exited with {}", status),
            }.into());
        }

        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(e) = self.close() {
                warn!("Encoder for {} did not shut down cleanly: {}", self.path.display(), e);
            }
        }
    }
}

/// Writes every frame to several sinks, e.g. a live preview plus a recording.
pub struct FanoutSink {
    sinks: Vec<Box<dyn FrameSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn FrameSink>>) -> Self {
        Self { sinks }
    }
}

impl FrameSink for FanoutSink {
    fn write_frame(&mut self, frame: &Frame, index: u64) -> Result<()> {
        for sink in &mut self.sinks {
            sink.write_frame(frame, index)?;
        }
        Ok(())
    }

    /// Closes every sink even if an earlier one fails; reports the first error.
    fn close(&mut self) -> Result<()> {
        let mut first_error: Option<CamoError> = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.close() {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!("Additional sink failed to close: {}", e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
