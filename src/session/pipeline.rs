use tracing::trace;

use crate::config::{Config, Tier};
use crate::composition::Compositor;
use crate::error::Result;
use crate::motion::{MotionSegmenter, Segmenter};
use crate::noise::NoisePool;
use crate::video::scaler::AdaptiveScaler;
use crate::video::types::{Frame, Resolution};

/// Per-frame transform: scale, segment, composite.
///
/// Holds all session state that evolves with the frame sequence, so frames
/// must be pushed strictly in decode order.
pub struct FramePipeline {
    scaler: AdaptiveScaler,
    segmenter: Segmenter,
    compositor: Compositor,
}

impl FramePipeline {
    pub fn new(scaler: AdaptiveScaler, segmenter: Segmenter, compositor: Compositor) -> Self {
        Self { scaler, segmenter, compositor }
    }

    /// Build the pipeline for a source at `original` under `tier` settings.
    ///
    /// The noise pool is drawn here, once.
    pub fn for_tier(original: Resolution, tier: Tier, config: &Config) -> Result<Self> {
        let tier_config = config.tier(tier);
        let scaler = AdaptiveScaler::new(original, &config.scaling)?;
        let pool = NoisePool::generate(scaler.target(), tier_config.pool_size, &config.noise)?;
        let segmenter = Segmenter::from_config(tier_config);
        Ok(Self::new(scaler, segmenter, Compositor::new(pool)))
    }

    pub fn scaler(&self) -> &AdaptiveScaler {
        &self.scaler
    }

    pub fn pool(&self) -> &NoisePool {
        self.compositor.pool()
    }

    pub fn segmenter_name(&self) -> &str {
        self.segmenter.name()
    }

    /// Turn decoded frame `frame_index` into its composite
    pub fn process(&mut self, frame: Frame, frame_index: u64) -> Result<Frame> {
        let working = self.scaler.scale(frame)?;
        let mask = self.segmenter.segment(&working)?;
        trace!("frame {}: {} motion pixels", frame_index, mask.motion_pixels());
        self.compositor.composite(&mask, frame_index)
    }
}
