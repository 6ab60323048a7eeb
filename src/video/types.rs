use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Represents a single video frame
///
/// Thin wrapper around an 8-bit, 3-channel RGB buffer. Frames are handed from
/// stage to stage by value and are not mutated once produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with black
    pub fn new_black(width: u32, height: u32) -> Self {
        Self { buffer: ImageBuffer::new(width, height) }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb(color));
        Self { buffer }
    }

    /// Create a frame from raw RGB bytes (row-major, no padding)
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buffer| Self { buffer })
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Get a pixel at the given coordinates (returns RGB array)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    /// Set a pixel at the given coordinates
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        self.buffer.put_pixel(x, y, Rgb(color));
    }

    /// Get the underlying image buffer
    pub fn as_image(&self) -> &RgbImage {
        &self.buffer
    }

    /// Raw RGB bytes, row-major
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }

}

/// Pixel dimensions of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size in bytes of one packed RGB24 frame
    pub fn rgb_frame_len(&self) -> usize {
        self.pixel_count() * 3
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Static properties of an opened source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Always positive; sources that report nothing usable get 30.0
    pub fps: f64,
    /// 0 when the container does not say
    pub frame_count: u64,
}

impl VideoMetadata {
    pub const DEFAULT_FPS: f64 = 30.0;

    /// Build metadata, replacing a zero, negative or non-finite frame rate with the default
    pub fn new(width: u32, height: u32, fps: f64, frame_count: u64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { Self::DEFAULT_FPS };
        Self { width, height, fps, frame_count }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn frame_count_known(&self) -> bool {
        self.frame_count > 0
    }
}
