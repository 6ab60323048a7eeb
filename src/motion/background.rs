use rayon::prelude::*;
use tracing::debug;

use crate::error::{Result, VideoError};
use crate::motion::{MotionMask, MotionSegmenter, MOTION, STILL};
use crate::video::types::{Frame, Resolution};

const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;

/// Running single-Gaussian background model per pixel.
///
/// Each pixel keeps an RGB mean and one isotropic variance. A pixel is motion
/// when its squared distance from the mean, summed over channels, reaches
/// `variance_threshold * variance`. With shadow detection on, pixels that look
/// like a darkened copy of the background (brightness ratio in
/// `[shadow_ratio, 1]`, small colour distortion) are kept out of the mask.
///
/// The learning rate is `1 / min(2 * frames_seen, history_length)`: quick while
/// the model warms up, then `1 / history_length`.
pub struct AdaptiveBackground {
    history_length: u32,
    variance_threshold: f32,
    detect_shadows: bool,
    shadow_ratio: f32,
    resolution: Option<Resolution>,
    mean: Vec<f32>,
    variance: Vec<f32>,
    frames_seen: u64,
}

impl AdaptiveBackground {
    pub fn new(history_length: u32, variance_threshold: f32, detect_shadows: bool, shadow_ratio: f32) -> Self {
        Self {
            history_length: history_length.max(1),
            variance_threshold,
            detect_shadows,
            shadow_ratio,
            resolution: None,
            mean: Vec::new(),
            variance: Vec::new(),
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    fn learning_rate(&self) -> f32 {
        let window = (2 * self.frames_seen).min(self.history_length as u64).max(1);
        1.0 / window as f32
    }

    fn initialize(&mut self, frame: &Frame) {
        self.resolution = Some(frame.resolution());
        self.mean = frame.as_bytes().iter().map(|&v| v as f32).collect();
        self.variance = vec![VAR_INIT; frame.resolution().pixel_count()];
        debug!("Background model initialized at {}", frame.resolution());
    }
}

/// Per-pixel classification and model update
#[derive(Clone, Copy)]
struct PixelModel {
    alpha: f32,
    threshold: f32,
    detect_shadows: bool,
    shadow_ratio: f32,
}

impl PixelModel {
    fn apply(&self, pixel: &[u8], mean: &mut [f32], variance: &mut f32) -> u8 {
        let x = [pixel[0] as f32, pixel[1] as f32, pixel[2] as f32];
        let d = [x[0] - mean[0], x[1] - mean[1], x[2] - mean[2]];
        let dist2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];

        let foreground = dist2 >= self.threshold * *variance;
        let motion = foreground && !(self.detect_shadows && self.is_shadow(&x, mean, *variance));

        for c in 0..3 {
            mean[c] += self.alpha * d[c];
        }
        *variance = (*variance + self.alpha * (dist2 - *variance)).clamp(VAR_MIN, VAR_MAX);

        if motion { MOTION } else { STILL }
    }

    /// Darker version of the background with little colour distortion
    fn is_shadow(&self, x: &[f32; 3], mean: &[f32], variance: f32) -> bool {
        let numerator = x[0] * mean[0] + x[1] * mean[1] + x[2] * mean[2];
        let denominator = mean[0] * mean[0] + mean[1] * mean[1] + mean[2] * mean[2];
        if denominator <= f32::EPSILON {
            return false;
        }

        let a = numerator / denominator;
        if !(self.shadow_ratio..=1.0).contains(&a) {
            return false;
        }

        let dist2a: f32 = (0..3).map(|c| (a * mean[c] - x[c]).powi(2)).sum();
        dist2a < self.threshold * variance * a * a
    }
}

impl MotionSegmenter for AdaptiveBackground {
    fn name(&self) -> &str {
        "adaptive_background"
    }

    fn segment(&mut self, frame: &Frame) -> Result<MotionMask> {
        let resolution = frame.resolution();
        match self.resolution {
            None => {
                self.initialize(frame);
                self.frames_seen = 1;
                return Ok(MotionMask::empty(resolution.width, resolution.height));
            }
            Some(expected) if expected != resolution => {
                return Err(VideoError::InvalidParameters {
                    details: format!("background model is {}, frame is {}", expected, resolution),
                }.into());
            }
            Some(_) => {}
        }

        self.frames_seen += 1;
        if resolution.is_empty() {
            return Ok(MotionMask::empty(resolution.width, resolution.height));
        }
        let model = PixelModel {
            alpha: self.learning_rate(),
            threshold: self.variance_threshold,
            detect_shadows: self.detect_shadows,
            shadow_ratio: self.shadow_ratio,
        };

        let width = resolution.width as usize;
        let mut mask = vec![STILL; resolution.pixel_count()];

        mask.par_chunks_mut(width)
            .zip(self.mean.par_chunks_mut(width * 3))
            .zip(self.variance.par_chunks_mut(width))
            .zip(frame.as_bytes().par_chunks(width * 3))
            .for_each(|(((mask_row, mean_row), var_row), pixel_row)| {
                for (x, out) in mask_row.iter_mut().enumerate() {
                    *out = model.apply(
                        &pixel_row[x * 3..x * 3 + 3],
                        &mut mean_row[x * 3..x * 3 + 3],
                        &mut var_row[x],
                    );
                }
            });

        MotionMask::from_raw(resolution.width, resolution.height, mask).ok_or_else(|| {
            VideoError::InvalidParameters {
                details: "mask size mismatch".to_string(),
            }.into()
        })
    }
}
