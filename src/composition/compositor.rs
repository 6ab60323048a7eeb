use rayon::prelude::*;

use crate::error::{Result, VideoError};
use crate::motion::{MotionMask, MOTION};
use crate::noise::NoisePool;
use crate::video::types::Frame;

/// Builds composite frames from a mask and the session noise pool
#[derive(Debug, Clone)]
pub struct Compositor {
    pool: NoisePool,
}

impl Compositor {
    pub fn new(pool: NoisePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &NoisePool {
        &self.pool
    }

    /// Pool entry `frame_index mod N` where the mask shows motion, background
    /// noise everywhere else.
    pub fn composite(&self, mask: &MotionMask, frame_index: u64) -> Result<Frame> {
        let resolution = self.pool.resolution();
        if mask.resolution() != resolution {
            return Err(VideoError::InvalidParameters {
                details: format!("mask is {}, noise pool is {}", mask.resolution(), resolution),
            }.into());
        }

        let background = self.pool.background().as_bytes();
        let active = self.pool.entry(frame_index).as_bytes();
        let mut out = background.to_vec();

        out.par_chunks_mut(3)
            .zip(active.par_chunks(3))
            .zip(mask.as_raw().par_iter())
            .for_each(|((dst, noise), &m)| {
                if m == MOTION {
                    dst.copy_from_slice(noise);
                }
            });

        Frame::from_rgb_bytes(resolution.width, resolution.height, out).ok_or_else(|| {
            VideoError::InvalidParameters {
                details: "composite buffer size mismatch".to_string(),
            }.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoiseConfig;
    use crate::video::types::Resolution;

    fn compositor(pool_size: usize) -> Compositor {
        let config = NoiseConfig { seed: Some(99), monochrome: false };
        Compositor::new(NoisePool::generate(Resolution::new(12, 8), pool_size, &config).unwrap())
    }

    #[test]
    fn test_empty_mask_is_background() {
        let comp = compositor(4);
        let out = comp.composite(&MotionMask::empty(12, 8), 3).unwrap();
        assert_eq!(&out, comp.pool().background());
    }

    #[test]
    fn test_full_mask_is_pool_entry() {
        let comp = compositor(4);
        let mask = MotionMask::from_fn(12, 8, |_, _| true);
        assert_eq!(&comp.composite(&mask, 6).unwrap(), comp.pool().entry(2));
    }

    #[test]
    fn test_pixels_come_from_noise_only() {
        let comp = compositor(5);
        let mask = MotionMask::from_fn(12, 8, |x, y| (x + y) % 3 == 0);
        for index in [0u64, 1, 7, 12] {
            let out = comp.composite(&mask, index).unwrap();
            for y in 0..8 {
                for x in 0..12 {
                    let expected = if mask.is_motion(x, y) {
                        comp.pool().entry(index).get_pixel(x, y)
                    } else {
                        comp.pool().background().get_pixel(x, y)
                    };
                    assert_eq!(out.get_pixel(x, y), expected);
                }
            }
        }
    }

    #[test]
    fn test_mask_size_mismatch() {
        let comp = compositor(2);
        assert!(comp.composite(&MotionMask::empty(6, 4), 0).is_err());
    }
}
