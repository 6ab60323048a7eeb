use image::imageops::{self, FilterType};
use tracing::debug;

use crate::config::{ResizeFilter, ScalingConfig};
use crate::error::{Result, VideoError};
use crate::video::types::{Frame, Resolution};

/// Fixes the working resolution once per session and resizes every frame to it.
///
/// Target width is `min(original_width, max_width)`; height keeps the aspect
/// ratio, rounded to the nearest pixel. When nothing needs to change the frame
/// is passed through untouched.
#[derive(Debug, Clone)]
pub struct AdaptiveScaler {
    original: Resolution,
    target: Resolution,
    scale_factor: f64,
    filter: FilterType,
}

impl AdaptiveScaler {
    pub fn new(original: Resolution, config: &ScalingConfig) -> Result<Self> {
        Self::with_filter(original, config.max_width, config.filter)
    }

    pub fn with_filter(original: Resolution, max_width: u32, filter: ResizeFilter) -> Result<Self> {
        if original.is_empty() {
            return Err(VideoError::InvalidParameters {
                details: format!("source resolution {} has no pixels", original),
            }.into());
        }
        if max_width == 0 {
            return Err(VideoError::InvalidParameters {
                details: "maximum width must be positive".to_string(),
            }.into());
        }

        let target = target_resolution(original, max_width);
        let scale_factor = target.width as f64 / original.width as f64;

        debug!("Working resolution {} -> {} (scale {:.4})", original, target, scale_factor);

        Ok(Self {
            original,
            target,
            scale_factor,
            filter: filter.into(),
        })
    }

    pub fn original(&self) -> Resolution {
        self.original
    }

    pub fn target(&self) -> Resolution {
        self.target
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// True when frames pass through without resampling
    pub fn is_identity(&self) -> bool {
        self.scale_factor == 1.0
    }

    /// Bring a source frame to the working resolution
    pub fn scale(&self, frame: Frame) -> Result<Frame> {
        if frame.resolution() != self.original {
            return Err(VideoError::DecodingFailed {
                reason: format!(
                    "frame is {} but the session was opened at {}",
                    frame.resolution(),
                    self.original
                ),
            }.into());
        }

        if self.is_identity() {
            return Ok(frame);
        }

        let resized = imageops::resize(
            frame.as_image(),
            self.target.width,
            self.target.height,
            self.filter,
        );
        Ok(Frame::new(resized))
    }
}

/// `min(width, max_width)` wide, aspect-preserving height, never below one pixel.
pub fn target_resolution(original: Resolution, max_width: u32) -> Resolution {
    let width = original.width.min(max_width);
    let height = (original.height as f64 * width as f64 / original.width as f64).round() as u32;
    Resolution::new(width, height.max(1))
}
