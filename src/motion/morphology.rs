//! Binary morphology on motion masks.
//!
//! Square structuring elements are applied as a horizontal pass followed by a
//! vertical pass. Window positions outside the mask are ignored.

use rayon::prelude::*;

use crate::error::{Result, VideoError};
use crate::motion::{MotionMask, MOTION, STILL};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Dilate,
    Erode,
}

impl Op {
    fn reduce(self, window: &[u8]) -> u8 {
        let hit = match self {
            Op::Dilate => window.iter().any(|&v| v == MOTION),
            Op::Erode => window.iter().all(|&v| v == MOTION),
        };
        if hit { MOTION } else { STILL }
    }
}

/// Dilation followed by erosion with a `kernel` x `kernel` square.
///
/// Fills holes and gaps narrower than the kernel without growing the outline.
/// Kernels of 0 or 1 return the mask unchanged.
pub fn close(mask: &MotionMask, kernel: u32) -> Result<MotionMask> {
    if kernel <= 1 || mask.resolution().is_empty() {
        return Ok(mask.clone());
    }
    let radius = (kernel / 2) as usize;
    let dilated = apply(mask, radius, Op::Dilate)?;
    apply(&dilated, radius, Op::Erode)
}

pub fn dilate(mask: &MotionMask, kernel: u32) -> Result<MotionMask> {
    if kernel <= 1 || mask.resolution().is_empty() {
        return Ok(mask.clone());
    }
    apply(mask, (kernel / 2) as usize, Op::Dilate)
}

pub fn erode(mask: &MotionMask, kernel: u32) -> Result<MotionMask> {
    if kernel <= 1 || mask.resolution().is_empty() {
        return Ok(mask.clone());
    }
    apply(mask, (kernel / 2) as usize, Op::Erode)
}

fn apply(mask: &MotionMask, radius: usize, op: Op) -> Result<MotionMask> {
    let width = mask.width() as usize;
    let height = mask.height() as usize;
    let src = mask.as_raw();

    // horizontal
    let mut horizontal = vec![STILL; src.len()];
    horizontal
        .par_chunks_mut(width)
        .zip(src.par_chunks(width))
        .for_each(|(out, row)| {
            for x in 0..width {
                let lo = x.saturating_sub(radius);
                let hi = (x + radius).min(width - 1);
                out[x] = op.reduce(&row[lo..=hi]);
            }
        });

    // vertical
    let mut result = vec![STILL; src.len()];
    result.par_chunks_mut(width).enumerate().for_each(|(y, out)| {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(height - 1);
        let mut column = Vec::with_capacity(hi - lo + 1);
        for x in 0..width {
            column.clear();
            column.extend((lo..=hi).map(|yy| horizontal[yy * width + x]));
            out[x] = op.reduce(&column);
        }
    });

    rebuild(mask, result)
}

/// Wrap a pass result at the input's size
fn rebuild(like: &MotionMask, data: Vec<u8>) -> Result<MotionMask> {
    let len = data.len();
    MotionMask::from_raw(like.width(), like.height(), data).ok_or_else(|| {
        VideoError::InvalidParameters {
            details: format!("mask pass produced {} bytes for {}", len, like.resolution()),
        }
        .into()
    })
}
