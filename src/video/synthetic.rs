use image::{ImageBuffer, Rgb};

use crate::error::Result;
use crate::video::source::FrameSource;
use crate::video::types::{Frame, VideoMetadata};

/// Deterministic in-memory source: a fixed gradient scene, optionally with a
/// bright square sliding across it.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    metadata: VideoMetadata,
    total_frames: u64,
    emitted: u64,
    square: Option<MovingSquare>,
    closed: bool,
}

#[derive(Debug, Clone, Copy)]
struct MovingSquare {
    size: u32,
    speed: u32,
}

impl SyntheticSource {
    /// A static scene of `frames` frames
    pub fn new(width: u32, height: u32, fps: f64, frames: u64) -> Self {
        Self {
            metadata: VideoMetadata::new(width, height, fps, frames),
            total_frames: frames,
            emitted: 0,
            square: None,
            closed: false,
        }
    }

    /// Add a `size`-pixel square moving `speed` pixels to the right per frame
    pub fn with_moving_square(mut self, size: u32, speed: u32) -> Self {
        let size = size.min(self.metadata.width).min(self.metadata.height).max(1);
        self.square = Some(MovingSquare { size, speed });
        self
    }

    /// Report the frame count as unknown, like containers without `nb_frames`
    pub fn with_unknown_length(mut self) -> Self {
        self.metadata.frame_count = 0;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The frame this source yields at `index`
    pub fn render(&self, index: u64) -> Frame {
        let (width, height) = (self.metadata.width, self.metadata.height);
        let square = self.square.map(|sq| {
            let travel = (width - sq.size).max(1) as u64;
            let x0 = ((index * sq.speed as u64) % travel) as u32;
            let y0 = (height - sq.size) / 2;
            (x0, y0, sq.size)
        });

        let buffer = ImageBuffer::from_fn(width, height, |x, y| {
            if let Some((x0, y0, size)) = square {
                if x >= x0 && x < x0 + size && y >= y0 && y < y0 + size {
                    return Rgb([255, 255, 255]);
                }
            }
            Rgb([
                (x * 200 / width.max(1)) as u8,
                (y * 200 / height.max(1)) as u8,
                96,
            ])
        });
        Frame::new(buffer)
    }
}

impl FrameSource for SyntheticSource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed || self.emitted >= self.total_frames {
            return Ok(None);
        }
        let frame = self.render(self.emitted);
        self.emitted += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
