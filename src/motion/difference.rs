use rayon::prelude::*;

use crate::error::{Result, VideoError};
use crate::motion::{MotionMask, MotionSegmenter, MOTION, STILL};
use crate::video::types::{Frame, Resolution};

/// Thresholded luminance difference against the immediately preceding frame.
///
/// Only one frame of history is kept, so anything that stops moving drops out
/// of the mask on the next frame.
pub struct FrameDifference {
    threshold: u8,
    previous: Option<(Resolution, Vec<u8>)>,
}

impl FrameDifference {
    pub fn new(threshold: u8) -> Self {
        Self { threshold, previous: None }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }
}

/// BT.601 integer luma
#[inline]
pub fn luma(pixel: &[u8]) -> u8 {
    ((299 * pixel[0] as u32 + 587 * pixel[1] as u32 + 114 * pixel[2] as u32 + 500) / 1000) as u8
}

fn luma_plane(frame: &Frame) -> Vec<u8> {
    frame.as_bytes().par_chunks(3).map(luma).collect()
}

impl MotionSegmenter for FrameDifference {
    fn name(&self) -> &str {
        "frame_difference"
    }

    fn segment(&mut self, frame: &Frame) -> Result<MotionMask> {
        let resolution = frame.resolution();
        let current = luma_plane(frame);

        let mask = match &self.previous {
            None => vec![STILL; resolution.pixel_count()],
            Some((expected, _)) if *expected != resolution => {
                return Err(VideoError::InvalidParameters {
                    details: format!("previous frame is {}, frame is {}", expected, resolution),
                }.into());
            }
            Some((_, previous)) => {
                let threshold = self.threshold;
                current
                    .par_iter()
                    .zip(previous.par_iter())
                    .map(|(&cur, &prev)| if cur.abs_diff(prev) > threshold { MOTION } else { STILL })
                    .collect()
            }
        };

        self.previous = Some((resolution, current));

        MotionMask::from_raw(resolution.width, resolution.height, mask).ok_or_else(|| {
            VideoError::InvalidParameters {
                details: "mask size mismatch".to_string(),
            }.into()
        })
    }
}
