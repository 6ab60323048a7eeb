//! # Sessions
//!
//! A session is one run of the pipeline over one source file:
//!
//! ```text
//! Opening ──> Running ──> Completed
//!    │           ├──────> Failed
//!    └─> Failed  └──────> Cancelled
//! ```
//!
//! Each session owns its source, sink, segmenter state and noise pool.
//! Nothing is shared between sessions except the file on disk, so a preview
//! and a batch session may run over the same upload at the same time.

pub mod pipeline;
pub mod progress;
pub mod runner;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::Tier;
use crate::error::DisposalWarning;
use crate::video::scaler::AdaptiveScaler;
use crate::video::types::{Resolution, VideoMetadata};

pub use pipeline::FramePipeline;
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use runner::{OutputTarget, SessionControls, SessionRequest, SessionRunner};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opening,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative stop signal, checked once per frame
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-session bookkeeping, owned by the thread running the pull loop.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    tier: Tier,
    source: PathBuf,
    output: Option<PathBuf>,
    original: Resolution,
    target: Resolution,
    scale_factor: f64,
    fps: f64,
    frame_count: u64,
    frame_index: u64,
    state: SessionState,
    truncated: bool,
}

impl Session {
    /// Fix the session's working geometry from the opened source
    pub fn new(
        id: impl Into<String>,
        tier: Tier,
        source: impl Into<PathBuf>,
        output: Option<PathBuf>,
        metadata: &VideoMetadata,
        scaler: &AdaptiveScaler,
    ) -> Self {
        Self {
            id: id.into(),
            tier,
            source: source.into(),
            output,
            original: scaler.original(),
            target: scaler.target(),
            scale_factor: scaler.scale_factor(),
            fps: metadata.fps,
            frame_count: metadata.frame_count,
            frame_index: 0,
            state: SessionState::Opening,
            truncated: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
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

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// 0 when unknown
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Index of the next frame to process; equals frames processed so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Count one more processed frame
    pub fn advance(&mut self) -> u64 {
        self.frame_index += 1;
        self.frame_index
    }

    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub(crate) fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!("state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    pub(crate) fn report(&self, disposal: Option<DisposalWarning>) -> SessionReport {
        SessionReport {
            session_id: self.id.clone(),
            tier: self.tier,
            state: self.state,
            frames_processed: self.frame_index,
            target: self.target,
            fps: self.fps,
            truncated: self.truncated,
            output: self.output.clone(),
            disposal,
        }
    }
}

/// Outcome of a finished session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: String,
    pub tier: Tier,
    pub state: SessionState,
    pub frames_processed: u64,
    /// Working resolution of every output frame
    pub target: Resolution,
    pub fps: f64,
    /// The source stopped yielding frames on a read error rather than a clean end
    pub truncated: bool,
    /// Container written by the session, if any
    pub output: Option<PathBuf>,
    /// Set when the source could not be deleted at teardown
    pub disposal: Option<DisposalWarning>,
}
