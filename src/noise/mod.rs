//! # Noise Synthesis
//!
//! All randomness a session needs is drawn once, at session start: one
//! background field covering still pixels and a fixed pool of fields that
//! rotate over motion pixels by frame index. Nothing is regenerated while the
//! session runs.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

use crate::config::NoiseConfig;
use crate::error::{Result, VideoError};
use crate::video::types::{Frame, Resolution};

/// Background noise plus the rotating motion pool, all at one resolution.
///
/// Cloning is cheap; clones share the same fields.
#[derive(Debug, Clone)]
pub struct NoisePool {
    resolution: Resolution,
    background: Arc<Frame>,
    entries: Arc<[Frame]>,
}

impl NoisePool {
    /// Generate the background field and `pool_size` pool fields.
    ///
    /// With `config.seed` set the fields are reproducible; otherwise the
    /// generator is seeded from OS entropy.
    pub fn generate(resolution: Resolution, pool_size: usize, config: &NoiseConfig) -> Result<Self> {
        if pool_size == 0 {
            return Err(VideoError::InvalidParameters {
                details: "noise pool size must be at least 1".to_string(),
            }.into());
        }

        let mut rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let background = noise_frame(&mut rng, resolution, config.monochrome)?;
        let entries = (0..pool_size)
            .map(|_| noise_frame(&mut rng, resolution, config.monochrome))
            .collect::<Result<Vec<Frame>>>()?;

        debug!(
            "Generated noise pool: {} + 1 fields at {} (monochrome: {})",
            pool_size, resolution, config.monochrome
        );

        Ok(Self {
            resolution,
            background: Arc::new(background),
            entries: entries.into(),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The field covering every still pixel
    pub fn background(&self) -> &Frame {
        &self.background
    }

    /// Pool entry used for motion pixels of frame `frame_index`
    pub fn entry(&self, frame_index: u64) -> &Frame {
        let slot = (frame_index % self.entries.len() as u64) as usize;
        &self.entries[slot]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn noise_frame(rng: &mut SmallRng, resolution: Resolution, monochrome: bool) -> Result<Frame> {
    let mut data = vec![0u8; resolution.rgb_frame_len()];
    if monochrome {
        let mut gray = vec![0u8; resolution.pixel_count()];
        rng.fill_bytes(&mut gray);
        for (pixel, value) in data.chunks_exact_mut(3).zip(gray) {
            pixel.fill(value);
        }
    } else {
        rng.fill_bytes(&mut data);
    }

    field_frame(resolution, data)
}

fn field_frame(resolution: Resolution, data: Vec<u8>) -> Result<Frame> {
    let len = data.len();
    Frame::from_rgb_bytes(resolution.width, resolution.height, data).ok_or_else(|| {
        VideoError::InvalidParameters {
            details: format!("noise field of {} bytes does not fit {}", len, resolution),
        }
        .into()
    })
}
