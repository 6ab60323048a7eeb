use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ConfigError, Result};

/// Main configuration for noise-camo
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working-resolution settings shared by both tiers
    pub scaling: ScalingConfig,

    /// Interactive preview tier
    #[serde(deserialize_with = "preview_tier")]
    pub preview: TierConfig,

    /// Accelerated batch tier
    #[serde(deserialize_with = "batch_tier")]
    pub batch: TierConfig,

    /// Noise synthesis settings
    pub noise: NoiseConfig,

    /// Encoder settings for container and preview output
    pub output: OutputConfig,

    /// Session lifecycle settings
    pub lifecycle: LifecycleConfig,

    /// Upload and output directories
    pub workspace: WorkspaceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scaling: ScalingConfig::default(),
            preview: TierConfig::preview(),
            batch: TierConfig::batch(),
            noise: NoiseConfig::default(),
            output: OutputConfig::default(),
            lifecycle: LifecycleConfig::default(),
            workspace: WorkspaceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.scaling.validate()?;
        self.preview.validate("preview")?;
        self.batch.validate("batch")?;
        self.output.validate()?;
        self.lifecycle.validate()?;
        Ok(())
    }

    /// Tier-specific settings
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Preview => &self.preview,
            Tier::Batch => &self.batch,
        }
    }

    /// Apply startup overrides (CLI flags or environment) on top of the file values.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(max_width) = overrides.max_width {
            self.scaling.max_width = max_width;
        }
        if let Some(pool) = overrides.preview_pool {
            self.preview.pool_size = pool;
        }
        if let Some(pool) = overrides.batch_pool {
            self.batch.pool_size = pool;
        }
        if let Some(kernel) = overrides.closing_kernel {
            let kernel = if kernel == 0 { None } else { Some(kernel) };
            self.preview.closing_kernel = kernel;
            self.batch.closing_kernel = kernel;
        }
        if let Some(threshold) = overrides.motion_threshold {
            for tier in [&mut self.preview, &mut self.batch] {
                if let SegmenterConfig::FrameDifference { threshold: t } = &mut tier.segmenter {
                    *t = threshold;
                }
            }
        }
    }
}

/// One of the two pipeline configurations sharing the compositing core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Preview,
    Batch,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Preview => "preview",
            Tier::Batch => "batch",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overrides collected from the startup surface
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_width: Option<u32>,
    pub preview_pool: Option<usize>,
    pub batch_pool: Option<usize>,
    pub motion_threshold: Option<u8>,
    /// `Some(0)` disables closing
    pub closing_kernel: Option<u32>,
}

/// Working-resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Width cap in pixels; narrower sources are left alone
    pub max_width: u32,

    /// Resampling filter used when downscaling
    pub filter: ResizeFilter,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            max_width: 1280,
            filter: ResizeFilter::Triangle,
        }
    }
}

impl ScalingConfig {
    fn validate(&self) -> Result<()> {
        if self.max_width == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scaling.max_width".to_string(),
                value: self.max_width.to_string()
            }.into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Per-tier pipeline configuration
///
/// Keys left out of a tier table keep that tier's defaults. In files,
/// `closing_kernel = 0` disables closing.
#[derive(Debug, Clone, Serialize)]
pub struct TierConfig {
    /// Number of pregenerated motion noise frames
    pub pool_size: usize,

    /// Motion segmentation strategy
    pub segmenter: SegmenterConfig,

    /// Square kernel size for mask closing; `None` skips the closing step
    #[serde(serialize_with = "kernel_to_file")]
    pub closing_kernel: Option<u32>,
}

/// A tier table as written in a file
#[derive(Deserialize)]
struct TierTable {
    pool_size: Option<usize>,
    segmenter: Option<SegmenterConfig>,
    closing_kernel: Option<u32>,
}

impl TierTable {
    fn over(self, mut tier: TierConfig) -> TierConfig {
        if let Some(pool_size) = self.pool_size {
            tier.pool_size = pool_size;
        }
        if let Some(segmenter) = self.segmenter {
            tier.segmenter = segmenter;
        }
        if let Some(kernel) = self.closing_kernel {
            tier.closing_kernel = (kernel != 0).then_some(kernel);
        }
        tier
    }
}

fn preview_tier<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<TierConfig, D::Error> {
    TierTable::deserialize(deserializer).map(|table| table.over(TierConfig::preview()))
}

fn batch_tier<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<TierConfig, D::Error> {
    TierTable::deserialize(deserializer).map(|table| table.over(TierConfig::batch()))
}

fn kernel_to_file<S: Serializer>(kernel: &Option<u32>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u32(kernel.unwrap_or(0))
}

impl TierConfig {
    /// Preview defaults: adaptive background model, 10 pool frames
    pub fn preview() -> Self {
        Self {
            pool_size: 10,
            segmenter: SegmenterConfig::adaptive_background(),
            closing_kernel: Some(5),
        }
    }

    /// Batch defaults: frame differencing, 20 pool frames
    pub fn batch() -> Self {
        Self {
            pool_size: 20,
            segmenter: SegmenterConfig::frame_difference(),
            closing_kernel: Some(5),
        }
    }

    fn validate(&self, tier: &str) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{}.pool_size", tier),
                value: self.pool_size.to_string()
            }.into());
        }

        if let Some(kernel) = self.closing_kernel {
            if kernel == 0 || kernel % 2 == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("{}.closing_kernel", tier),
                    value: kernel.to_string()
                }.into());
            }
        }

        self.segmenter.validate(tier)
    }
}

/// Motion segmentation strategy and its tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SegmenterConfig {
    AdaptiveBackground {
        /// Number of frames the background estimate effectively remembers
        #[serde(default = "defaults::history_length")]
        history_length: u32,
        /// Squared Mahalanobis distance above which a pixel is foreground
        #[serde(default = "defaults::variance_threshold")]
        variance_threshold: f32,
        /// Exclude shadowed background from the motion flag
        #[serde(default = "defaults::detect_shadows")]
        detect_shadows: bool,
        /// Darkest brightness ratio still treated as a shadow
        #[serde(default = "defaults::shadow_ratio")]
        shadow_ratio: f32,
    },
    FrameDifference {
        /// Luminance difference (0-255) above which a pixel moved
        #[serde(default = "defaults::threshold")]
        threshold: u8,
    },
}

mod defaults {
    pub fn history_length() -> u32 {
        500
    }

    pub fn variance_threshold() -> f32 {
        50.0
    }

    pub fn detect_shadows() -> bool {
        true
    }

    pub fn shadow_ratio() -> f32 {
        0.5
    }

    pub fn threshold() -> u8 {
        25
    }
}

impl SegmenterConfig {
    pub fn adaptive_background() -> Self {
        Self::AdaptiveBackground {
            history_length: defaults::history_length(),
            variance_threshold: defaults::variance_threshold(),
            detect_shadows: defaults::detect_shadows(),
            shadow_ratio: defaults::shadow_ratio(),
        }
    }

    pub fn frame_difference() -> Self {
        Self::FrameDifference { threshold: defaults::threshold() }
    }

    fn validate(&self, tier: &str) -> Result<()> {
        match self {
            Self::AdaptiveBackground { history_length, variance_threshold, shadow_ratio, .. } => {
                if *history_length == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: format!("{}.segmenter.history_length", tier),
                        value: history_length.to_string()
                    }.into());
                }
                if *variance_threshold <= 0.0 {
                    return Err(ConfigError::InvalidValue {
                        key: format!("{}.segmenter.variance_threshold", tier),
                        value: variance_threshold.to_string()
                    }.into());
                }
                if !(*shadow_ratio > 0.0 && *shadow_ratio <= 1.0) {
                    return Err(ConfigError::InvalidValue {
                        key: format!("{}.segmenter.shadow_ratio", tier),
                        value: shadow_ratio.to_string()
                    }.into());
                }
                Ok(())
            }
            Self::FrameDifference { .. } => Ok(()),
        }
    }
}

/// Noise synthesis configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Fixed seed for reproducible pools
    pub seed: Option<u64>,

    /// One gray value per pixel instead of independent channels
    pub monochrome: bool,
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// FFmpeg video codec for the output container
    pub codec: String,

    /// Container quality setting (0-100, higher is better)
    pub quality: u8,

    /// JPEG quality of preview units (1-100)
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            codec: "mpeg4".to_string(),
            quality: 85,
            jpeg_quality: 80,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if self.codec.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "output.codec".to_string(),
                value: self.codec.clone()
            }.into());
        }

        if self.quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "output.quality".to_string(),
                value: self.quality.to_string()
            }.into());
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::InvalidValue {
                key: "output.jpeg_quality".to_string(),
                value: self.jpeg_quality.to_string()
            }.into());
        }

        Ok(())
    }
}

/// What happens to the uploaded source once a session tears down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposalPolicy {
    /// Delete after every session, whatever the outcome
    Always,
    /// Delete only after the source was fully processed
    OnCompletion,
    Never,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Minimum wall-clock gap between progress reports
    pub progress_interval_ms: u64,

    /// Source-file disposal policy
    pub disposal: DisposalPolicy,

    /// Preview units buffered ahead of the transport
    pub preview_buffer: usize,

    /// Worker threads for per-frame pixel work; 0 uses every core
    pub processing_threads: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 1000,
            disposal: DisposalPolicy::OnCompletion,
            preview_buffer: 1,
            processing_threads: 0,
        }
    }
}

impl LifecycleConfig {
    fn validate(&self) -> Result<()> {
        if self.preview_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "lifecycle.preview_buffer".to_string(),
                value: self.preview_buffer.to_string()
            }.into());
        }

        Ok(())
    }

    /// Resolved worker count for the pixel pool
    pub fn worker_threads(&self) -> usize {
        match self.processing_threads {
            0 => num_cpus::get(),
            n => n,
        }
    }

    pub fn progress_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.progress_interval_ms)
    }
}

/// Upload and output directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub uploads_dir: PathBuf,
    pub outputs_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            outputs_dir: PathBuf::from("processed_videos"),
        }
    }
}
