//! # Motion Segmentation
//!
//! Turns each working-resolution frame into a binary [`MotionMask`]. Two
//! interchangeable strategies implement [`MotionSegmenter`]:
//!
//! - [`AdaptiveBackground`]: running per-pixel Gaussian background estimate
//!   with shadow suppression (preview tier)
//! - [`FrameDifference`]: thresholded luminance difference against the
//!   previous frame (batch tier)
//!
//! [`Segmenter`] picks the strategy from tier configuration and optionally
//! closes the mask to remove speckle.
//!
//! ```rust
//! use noise_camo::config::TierConfig;
//! use noise_camo::motion::{MotionSegmenter, Segmenter};
//! use noise_camo::video::Frame;
//!
//! let mut segmenter = Segmenter::from_config(&TierConfig::batch());
//! let mask = segmenter.segment(&Frame::new_black(64, 48)).unwrap();
//! assert_eq!(mask.motion_pixels(), 0);
//! ```

pub mod background;
pub mod difference;
pub mod morphology;

use image::{GrayImage, ImageBuffer, Luma};
use tracing::trace;

use crate::config::{SegmenterConfig, TierConfig};
use crate::error::Result;
use crate::video::types::{Frame, Resolution};

pub use background::AdaptiveBackground;
pub use difference::FrameDifference;

/// Mask value for a pixel flagged as motion
pub const MOTION: u8 = 255;
/// Mask value for a still pixel
pub const STILL: u8 = 0;

/// Per-pixel binary motion field at working resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionMask {
    buffer: GrayImage,
}

impl MotionMask {
    /// An all-still mask
    pub fn empty(width: u32, height: u32) -> Self {
        Self { buffer: ImageBuffer::new(width, height) }
    }

    /// Build a mask from a predicate over pixel coordinates
    pub fn from_fn<F: FnMut(u32, u32) -> bool>(width: u32, height: u32, mut f: F) -> Self {
        let buffer = ImageBuffer::from_fn(width, height, |x, y| {
            Luma([if f(x, y) { MOTION } else { STILL }])
        });
        Self { buffer }
    }

    /// Wrap raw mask bytes; any non-zero byte counts as motion
    pub fn from_raw(width: u32, height: u32, mut data: Vec<u8>) -> Option<Self> {
        for value in data.iter_mut() {
            *value = if *value != STILL { MOTION } else { STILL };
        }
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

    pub fn is_motion(&self, x: u32, y: u32) -> bool {
        self.buffer.get_pixel(x, y).0[0] == MOTION
    }

    pub fn set(&mut self, x: u32, y: u32, motion: bool) {
        self.buffer.put_pixel(x, y, Luma([if motion { MOTION } else { STILL }]));
    }

    /// Row-major mask bytes, each either [`MOTION`] or [`STILL`]
    pub fn as_raw(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    pub fn motion_pixels(&self) -> usize {
        self.buffer.as_raw().iter().filter(|&&v| v == MOTION).count()
    }

    /// Fraction of the frame flagged as motion
    pub fn coverage(&self) -> f64 {
        let total = self.resolution().pixel_count();
        if total == 0 {
            return 0.0;
        }
        self.motion_pixels() as f64 / total as f64
    }
}

/// A motion segmentation strategy.
///
/// Implementations keep whatever history they need between calls and must be
/// fed frames strictly in decode order at a single resolution.
pub trait MotionSegmenter: Send {
    fn name(&self) -> &str;

    /// Classify every pixel of `frame`, updating internal state
    fn segment(&mut self, frame: &Frame) -> Result<MotionMask>;
}

/// Strategy selected by tier configuration plus optional mask closing.
pub struct Segmenter {
    strategy: Box<dyn MotionSegmenter>,
    closing_kernel: Option<u32>,
}

impl Segmenter {
    pub fn from_config(config: &TierConfig) -> Self {
        let strategy: Box<dyn MotionSegmenter> = match &config.segmenter {
            SegmenterConfig::AdaptiveBackground {
                history_length,
                variance_threshold,
                detect_shadows,
                shadow_ratio,
            } => Box::new(AdaptiveBackground::new(
                *history_length,
                *variance_threshold,
                *detect_shadows,
                *shadow_ratio,
            )),
            SegmenterConfig::FrameDifference { threshold } => Box::new(FrameDifference::new(*threshold)),
        };
        Self::with_strategy(strategy, config.closing_kernel)
    }

    pub fn with_strategy(strategy: Box<dyn MotionSegmenter>, closing_kernel: Option<u32>) -> Self {
        Self { strategy, closing_kernel }
    }
}

impl MotionSegmenter for Segmenter {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn segment(&mut self, frame: &Frame) -> Result<MotionMask> {
        let mask = self.strategy.segment(frame)?;
        let mask = match self.closing_kernel {
            Some(kernel) if kernel > 1 => morphology::close(&mask, kernel)?,
            _ => mask,
        };
        trace!("{} mask coverage {:.4}", self.strategy.name(), mask.coverage());
        Ok(mask)
    }
}
