//! # Noise-Camo
//!
//! Turn an uploaded video into a privacy-preserving noise composite: every
//! output pixel is synthetic noise, static where nothing moves and drawn from
//! a rotating noise pool where motion is detected.
//!
//! Two tiers share the compositing core:
//!
//! - **preview**: adaptive background segmentation, each composite frame
//!   emitted as a JPEG unit for a live viewer
//! - **batch**: cheap frame-difference segmentation, frames encoded into a
//!   container file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use noise_camo::{CamouflageService, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let service = CamouflageService::with_ffmpeg(Config::default());
//! service.workspace().ensure().await?;
//!
//! let bytes = std::fs::read("holiday.mp4")?;
//! let ticket = service.persist_upload("holiday.mp4", &bytes).await?;
//!
//! let job = service.start_batch(&ticket.source_id, &ticket.output_id).await?;
//! let report = job.wait().await?;
//! println!("{} frames at {}", report.frames_processed, report.target);
//!
//! let output = service.fetch_output(&ticket.output_id).await?;
//! println!("download as {}", output.download_name);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - frame types, FFmpeg source/writer, scaler, preview emitter
//! - [`motion`] - motion masks and the segmentation strategies
//! - [`noise`] - per-session noise pool
//! - [`composition`] - mask + noise → composite frame
//! - [`session`] - pull loop, teardown, progress, disposal
//! - [`service`] - upload/preview/batch/fetch façade
//! - [`config`] - configuration management
//!
//! ## Custom Segmenters
//!
//! Any type implementing [`MotionSegmenter`](motion::MotionSegmenter) can drive
//! a pipeline:
//!
//! ```rust,no_run
//! use noise_camo::motion::{MotionMask, MotionSegmenter};
//! use noise_camo::video::Frame;
//!
//! struct EverythingMoves;
//!
//! impl MotionSegmenter for EverythingMoves {
//!     fn name(&self) -> &str {
//!         "everything_moves"
//!     }
//!
//!     fn segment(&mut self, frame: &Frame) -> noise_camo::Result<MotionMask> {
//!         Ok(MotionMask::from_fn(frame.width(), frame.height(), |_, _| true))
//!     }
//! }
//! ```

pub mod composition;
pub mod config;
pub mod error;
pub mod motion;
pub mod noise;
pub mod service;
pub mod session;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::{Config, Tier},
    error::{CamoError, Result},
    service::{BatchHandle, CamouflageService, PreviewStream, UploadTicket},
    session::{SessionReport, SessionRunner, SessionState},
};
