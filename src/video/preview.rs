use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, SessionError, VideoError};
use crate::video::sink::FrameSink;
use crate::video::types::Frame;

/// Boundary token used when units are framed as `multipart/x-mixed-replace`.
pub const MULTIPART_BOUNDARY: &str = "frame";

/// One independently compressed preview frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewUnit {
    pub index: u64,
    pub jpeg: Vec<u8>,
}

impl PreviewUnit {
    /// Render the unit as one part of a `multipart/x-mixed-replace; boundary=frame` body.
    pub fn to_multipart_part(&self) -> Vec<u8> {
        let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MULTIPART_BOUNDARY);
        let mut part = Vec::with_capacity(header.len() + self.jpeg.len() + 2);
        part.extend_from_slice(header.as_bytes());
        part.extend_from_slice(&self.jpeg);
        part.extend_from_slice(b"\r\n");
        part
    }

    pub fn content_type() -> String {
        format!("multipart/x-mixed-replace; boundary={}", MULTIPART_BOUNDARY)
    }
}

/// JPEG-encode a frame as a standalone still image.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
    encoder
        .encode(frame.as_bytes(), frame.width(), frame.height(), ColorType::Rgb8)
        .map_err(|e| VideoError::WriteFailure {
            reason: format!("JPEG encoding failed: {}", e),
        })?;
    Ok(jpeg)
}

/// Emits each frame as a [`PreviewUnit`] on a bounded channel.
///
/// Must run on a blocking thread: `write_frame` parks until the consumer has
/// room for the next unit. A dropped receiver surfaces as
/// [`SessionError::Cancelled`] so the session stops decoding.
pub struct PreviewEmitter {
    sender: Option<mpsc::Sender<PreviewUnit>>,
    quality: u8,
}

impl PreviewEmitter {
    pub fn new(sender: mpsc::Sender<PreviewUnit>, quality: u8) -> Self {
        Self {
            sender: Some(sender),
            quality,
        }
    }
}

impl FrameSink for PreviewEmitter {
    fn write_frame(&mut self, frame: &Frame, index: u64) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(SessionError::Cancelled)?;
        if sender.is_closed() {
            return Err(SessionError::Cancelled.into());
        }

        let jpeg = encode_jpeg(frame, self.quality)?;
        sender
            .blocking_send(PreviewUnit { index, jpeg })
            .map_err(|_| SessionError::Cancelled)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the sender ends the consumer's sequence
        if self.sender.take().is_some() {
            debug!("Preview sequence closed");
        }
        Ok(())
    }
}
