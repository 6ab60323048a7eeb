use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout};

use tracing::{debug, info, warn};

use crate::error::{Result, VideoError};
use crate::video::ffmpeg;
use crate::video::types::{Frame, VideoMetadata};

/// Sequential frame supplier for one session.
///
/// Every session opens its own source; two sources over the same path share
/// nothing but the file on disk.
pub trait FrameSource: Send {
    /// Static properties fixed when the source was opened
    fn metadata(&self) -> VideoMetadata;

    /// Next frame in decode order, `Ok(None)` once the stream is exhausted
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the decode handle. Safe to call more than once.
    fn close(&mut self);
}

/// Decodes a video file through an `ffmpeg` child process emitting RGB24 frames.
pub struct FfmpegSource {
    path: PathBuf,
    metadata: VideoMetadata,
    child: Option<Child>,
    reader: Option<BufReader<ChildStdout>>,
    /// First frame, read eagerly so an undecodable file fails at open
    pending: Option<Frame>,
    frames_read: u64,
}

impl FfmpegSource {
    /// Probe and open `path`; fails with `NotReadable` if no first frame can be decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(VideoError::NotReadable {
                path: path.display().to_string(),
                reason: "file does not exist".to_string(),
            }.into());
        }

        let metadata = ffmpeg::probe(path)?;

        let child = ffmpeg::spawn_decoder(path).map_err(|e| VideoError::NotReadable {
            path: path.display().to_string(),
            reason: format!("ffmpeg could not be started: {}", e),
        })?;
        let mut source = Self::from_decoder(path, metadata, child);

        match source.read_frame() {
            Ok(Some(frame)) => source.pending = Some(frame),
            Ok(None) => {
                source.close();
                return Err(VideoError::NotReadable {
                    path: path.display().to_string(),
                    reason: "no decodable frames".to_string(),
                }.into());
            }
            Err(e) => {
                source.close();
                return Err(VideoError::NotReadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }.into());
            }
        }

        info!("Opened {} ({}x{} @ {:.2}fps, {} frames)",
              path.display(), metadata.width, metadata.height, metadata.fps,
              if metadata.frame_count_known() { metadata.frame_count.to_string() } else { "unknown".to_string() });

        Ok(source)
    }

    /// Wrap an already spawned decoder writing RGB24 frames on stdout
    pub(crate) fn from_decoder(path: &Path, metadata: VideoMetadata, mut child: Child) -> Self {
        let reader = child.stdout.take().map(BufReader::new);
        Self {
            path: path.to_path_buf(),
            metadata,
            child: Some(child),
            reader,
            pending: None,
            frames_read: 0,
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let resolution = self.metadata.resolution();
        let mut buffer = vec![0u8; resolution.rgb_frame_len()];

        match reader.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finish_decoder()?;
                return Ok(None);
            }
            Err(e) => {
                return Err(VideoError::DecodingFailed {
                    reason: format!("reading decoded frame {}: {}", self.frames_read, e),
                }.into());
            }
        }

        self.frames_read += 1;
        Frame::from_rgb_bytes(resolution.width, resolution.height, buffer)
            .map(Some)
            .ok_or_else(|| VideoError::DecodingFailed {
                reason: "decoded frame has the wrong size".to_string(),
            }.into())
    }

    /// Reap the decoder after its output ran dry; only a zero exit is a real end of stream.
    fn finish_decoder(&mut self) -> Result<()> {
        self.reader = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait().map_err(|e| VideoError::DecodingFailed {
            reason: format!("waiting for decoder: {}", e),
        })?;
        if !status.success() {
            return Err(VideoError::DecodingFailed {
                reason: format!("decoder {} after {} frames", status, self.frames_read),
            }.into());
        }

        debug!("Decoder for {} reached end after {} frames", self.path.display(), self.frames_read);
        Ok(())
    }
}

impl FrameSource for FfmpegSource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_frame()
    }

    fn close(&mut self) {
        self.reader = None;
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            // The decoder may still be mid-file when a session stops early
            if let Err(e) = child.kill() {
                if e.kind() != ErrorKind::InvalidInput {
                    warn!("Failed to stop decoder for {}: {}", self.path.display(), e);
                }
            }
            let _ = child.wait();
            debug!("Released decoder for {}", self.path.display());
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_not_readable() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfmpegSource::open(dir.path().join("missing.mp4")).err().unwrap();
        assert!(matches!(err, crate::CamoError::Video(VideoError::NotReadable { .. })));
    }

    #[test]
    fn test_directory_is_not_readable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FfmpegSource::open(dir.path()).is_err());
    }

    #[cfg(unix)]
    fn shell_decoder(script: &str) -> Child {
        std::process::Command::new("sh")
            .args(["-c", script])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_dying_mid_file_is_an_error() {
        // one 2x2 frame, then a crash; the container claims 90 frames
        let child = shell_decoder("head -c 12 /dev/zero; exit 1");
        let metadata = VideoMetadata::new(2, 2, 30.0, 90);
        let mut source = FfmpegSource::from_decoder(Path::new("clip.mp4"), metadata, child);

        assert!(source.next_frame().unwrap().is_some());
        let err = source.next_frame().unwrap_err();
        assert!(matches!(err, crate::CamoError::Video(VideoError::DecodingFailed { .. })));
        source.close();
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_decoder_exit_ends_stream() {
        let child = shell_decoder("head -c 24 /dev/zero");
        let metadata = VideoMetadata::new(2, 2, 30.0, 2);
        let mut source = FfmpegSource::from_decoder(Path::new("clip.mp4"), metadata, child);

        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }
}
