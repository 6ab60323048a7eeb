//! # Service Façade
//!
//! The surface an external route layer calls: persist an upload, start a
//! live preview, start a batch job, fetch the finished file. Every session
//! runs its blocking pull loop on its own `spawn_blocking` task.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{Config, Tier, WorkspaceConfig};
use crate::error::{CamoError, Result, SessionError};
use crate::session::{
    CancelFlag, OutputTarget, ProgressSnapshot, SessionControls, SessionReport, SessionRequest,
    SessionRunner,
};
use crate::video::backend::{FfmpegBackend, MediaBackend};
use crate::video::preview::PreviewUnit;

/// Reject ids that could escape their directory
pub fn validate_id(id: &str) -> Result<()> {
    let bad = matches!(id, "" | "." | "..")
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0');
    if bad {
        return Err(SessionError::InvalidIdentifier { id: id.to_string() }.into());
    }
    Ok(())
}

/// Identifiers handed back after an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub source_id: String,
    pub output_id: String,
}

/// A finished container ready to be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub download_name: String,
}

/// Upload and output directories
#[derive(Debug, Clone)]
pub struct Workspace {
    uploads: PathBuf,
    outputs: PathBuf,
}

impl Workspace {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            uploads: config.uploads_dir.clone(),
            outputs: config.outputs_dir.clone(),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs
    }

    /// Create both directories if missing
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.uploads).await?;
        tokio::fs::create_dir_all(&self.outputs).await?;
        Ok(())
    }

    /// Store uploaded bytes as `raw_<unix-ts>_<name>` and pick the output id
    pub async fn persist_upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadTicket> {
        validate_id(file_name)?;
        let timestamp = chrono::Utc::now().timestamp();
        let source_id = format!("raw_{}_{}", timestamp, file_name.replace(' ', "_"));
        let output_id = format!("out_{}.mp4", timestamp);

        tokio::fs::write(self.uploads.join(&source_id), bytes).await?;
        info!("📥 Stored upload {} ({} bytes)", source_id, bytes.len());

        Ok(UploadTicket { source_id, output_id })
    }

    /// Path of an existing upload
    pub async fn source_path(&self, source_id: &str) -> Result<PathBuf> {
        validate_id(source_id)?;
        let path = self.uploads.join(source_id);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(SessionError::UnknownSource { id: source_id.to_string() }.into()),
        }
    }

    /// Where an output id is (or will be) written
    pub fn output_path(&self, output_id: &str) -> Result<PathBuf> {
        validate_id(output_id)?;
        Ok(self.outputs.join(output_id))
    }

    pub async fn fetch_output(&self, output_id: &str) -> Result<OutputFile> {
        let path = self.output_path(output_id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(OutputFile {
                path,
                download_name: format!("noised_{}", output_id),
            }),
            _ => Err(SessionError::OutputNotFound { id: output_id.to_string() }.into()),
        }
    }
}

/// Live preview sequence; dropping it cancels the session.
pub struct PreviewStream {
    session_id: String,
    units: mpsc::Receiver<PreviewUnit>,
    progress: watch::Receiver<ProgressSnapshot>,
    task: JoinHandle<Result<SessionReport>>,
}

impl PreviewStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next unit, or `None` once the session has ended
    pub async fn next(&mut self) -> Option<PreviewUnit> {
        self.units.recv().await
    }

    pub fn progress(&self) -> ProgressSnapshot {
        *self.progress.borrow()
    }

    /// Stop consuming and wait for teardown.
    ///
    /// A session still producing frames ends as cancelled.
    pub async fn close(self) -> Result<SessionReport> {
        let Self { units, task, .. } = self;
        drop(units);
        task.await.map_err(join_error)?
    }
}

/// Handle on a running batch session
pub struct BatchHandle {
    session_id: String,
    output_id: String,
    cancel: CancelFlag,
    progress: watch::Receiver<ProgressSnapshot>,
    task: JoinHandle<Result<SessionReport>>,
}

impl BatchHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn output_id(&self) -> &str {
        &self.output_id
    }

    /// Last published progress; at most one report interval old
    pub fn progress(&self) -> ProgressSnapshot {
        *self.progress.borrow()
    }

    /// Ask the session to stop before its next frame
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<SessionReport> {
        self.task.await.map_err(join_error)?
    }
}

fn join_error(e: tokio::task::JoinError) -> CamoError {
    SessionError::TaskFailed { reason: e.to_string() }.into()
}

/// Entry point for the route layer
pub struct CamouflageService {
    runner: SessionRunner,
    workspace: Workspace,
    preview_buffer: usize,
    next_session: AtomicU64,
}

impl CamouflageService {
    pub fn new(config: Config, backend: Arc<dyn MediaBackend>) -> Self {
        let workspace = Workspace::new(&config.workspace);
        let preview_buffer = config.lifecycle.preview_buffer.max(1);
        Self {
            runner: SessionRunner::new(Arc::new(config), backend),
            workspace,
            preview_buffer,
            next_session: AtomicU64::new(1),
        }
    }

    /// Service backed by the system `ffmpeg`/`ffprobe`
    pub fn with_ffmpeg(config: Config) -> Self {
        Self::new(config, Arc::new(FfmpegBackend))
    }

    pub fn config(&self) -> &Config {
        self.runner.config()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub async fn persist_upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadTicket> {
        self.workspace.persist_upload(file_name, bytes).await
    }

    /// Start a live preview over an upload.
    ///
    /// With `record_as` set the composited frames are also written to that
    /// output id.
    pub async fn start_preview(&self, source_id: &str, record_as: Option<&str>) -> Result<PreviewStream> {
        let source = self.workspace.source_path(source_id).await?;
        let record = record_as.map(|id| self.workspace.output_path(id)).transpose()?;

        let (sender, units) = mpsc::channel(self.preview_buffer);
        let (controls, progress) = SessionControls::new();
        let request = SessionRequest {
            id: self.session_id(Tier::Preview),
            tier: Tier::Preview,
            source,
            target: OutputTarget::Live { sender, record },
        };
        let session_id = request.id.clone();
        debug!("Starting preview session {} for {}", session_id, source_id);

        let runner = self.runner.clone();
        let task = tokio::task::spawn_blocking(move || runner.run(request, controls));

        Ok(PreviewStream { session_id, units, progress, task })
    }

    /// Start a batch job writing to `output_id`
    pub async fn start_batch(&self, source_id: &str, output_id: &str) -> Result<BatchHandle> {
        let source = self.workspace.source_path(source_id).await?;
        let output = self.workspace.output_path(output_id)?;

        let (controls, progress) = SessionControls::new();
        let cancel = controls.cancel.clone();
        let request = SessionRequest {
            id: self.session_id(Tier::Batch),
            tier: Tier::Batch,
            source,
            target: OutputTarget::File(output),
        };
        let session_id = request.id.clone();
        debug!("Starting batch session {} for {} -> {}", session_id, source_id, output_id);

        let runner = self.runner.clone();
        let task = tokio::task::spawn_blocking(move || runner.run(request, controls));

        Ok(BatchHandle {
            session_id,
            output_id: output_id.to_string(),
            cancel,
            progress,
            task,
        })
    }

    pub async fn fetch_output(&self, output_id: &str) -> Result<OutputFile> {
        self.workspace.fetch_output(output_id).await
    }

    fn session_id(&self, tier: Tier) -> String {
        let n = self.next_session.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", tier, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DisposalPolicy, NoiseConfig, OutputConfig};
    use crate::session::SessionState;
    use crate::video::sink::FrameSink;
    use crate::video::source::FrameSource;
    use crate::video::synthetic::SyntheticSource;
    use crate::video::types::{Frame, Resolution};

    /// Counts frames and writes the count to the output path on close
    struct FileCountSink {
        path: PathBuf,
        frames: u64,
    }

    impl FrameSink for FileCountSink {
        fn write_frame(&mut self, _frame: &Frame, _index: u64) -> Result<()> {
            self.frames += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            std::fs::write(&self.path, self.frames.to_string())?;
            Ok(())
        }
    }

    struct MemoryBackend {
        frames: u64,
    }

    impl MediaBackend for MemoryBackend {
        fn open_source(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(SyntheticSource::new(32, 24, 30.0, self.frames).with_moving_square(4, 2)))
        }

        fn open_writer(&self, path: &Path, _: Resolution, _: f64, _: &OutputConfig) -> Result<Box<dyn FrameSink>> {
            Ok(Box::new(FileCountSink { path: path.to_path_buf(), frames: 0 }))
        }
    }

    async fn service(dir: &Path, frames: u64) -> CamouflageService {
        let mut config = Config {
            noise: NoiseConfig { seed: Some(2), monochrome: false },
            ..Config::default()
        };
        config.workspace = WorkspaceConfig {
            uploads_dir: dir.join("uploads"),
            outputs_dir: dir.join("processed_videos"),
        };
        let service = CamouflageService::new(config, Arc::new(MemoryBackend { frames }));
        service.workspace().ensure().await.unwrap();
        service
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("raw_1_clip.mp4").is_ok());
        assert!(validate_id("../etc/passwd").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("a\\b").is_err());
        assert!(validate_id("").is_err());
        assert!(validate_id("..").is_err());
        assert!(validate_id(".").is_err());
        assert!(validate_id("clip..v2.mp4").is_ok());
        assert!(validate_id("raw_1_clip..v2.mp4").is_ok());
    }

    #[tokio::test]
    async fn test_persist_upload_naming() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1).await;
        let ticket = service.persist_upload("my holiday.mp4", b"bytes").await.unwrap();

        assert!(ticket.source_id.starts_with("raw_"));
        assert!(ticket.source_id.ends_with("_my_holiday.mp4"));
        assert!(ticket.output_id.starts_with("out_") && ticket.output_id.ends_with(".mp4"));
        assert!(dir.path().join("uploads").join(&ticket.source_id).is_file());
    }

    #[tokio::test]
    async fn test_upload_name_with_separator_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1).await;
        let err = service.persist_upload("../x.mp4", b"bytes").await.unwrap_err();
        assert!(matches!(err, CamoError::Session(SessionError::InvalidIdentifier { .. })));
    }

    #[tokio::test]
    async fn test_batch_roundtrip_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 15).await;
        let ticket = service.persist_upload("clip.mp4", b"bytes").await.unwrap();

        let handle = service.start_batch(&ticket.source_id, &ticket.output_id).await.unwrap();
        assert!(handle.session_id().starts_with("batch-"));
        let report = handle.wait().await.unwrap();
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.frames_processed, 15);

        let output = service.fetch_output(&ticket.output_id).await.unwrap();
        assert_eq!(output.download_name, format!("noised_{}", ticket.output_id));
        assert_eq!(std::fs::read_to_string(output.path).unwrap(), "15");

        // on_completion disposal removed the upload
        assert!(!dir.path().join("uploads").join(&ticket.source_id).exists());
    }

    #[tokio::test]
    async fn test_batch_cancel_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1_000_000).await;
        let ticket = service.persist_upload("long.mp4", b"bytes").await.unwrap();

        let handle = service.start_batch(&ticket.source_id, &ticket.output_id).await.unwrap();
        handle.cancel();
        let err = handle.wait().await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(dir.path().join("uploads").join(&ticket.source_id).exists());
    }

    #[tokio::test]
    async fn test_unknown_source_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1).await;

        let err = service.start_batch("raw_0_nothing.mp4", "out_0.mp4").await.err().unwrap();
        assert!(matches!(err, CamoError::Session(SessionError::UnknownSource { .. })));

        let err = service.fetch_output("out_0.mp4").await.unwrap_err();
        assert!(matches!(err, CamoError::Session(SessionError::OutputNotFound { .. })));
    }

    #[tokio::test]
    async fn test_preview_streams_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 6).await;
        let ticket = service.persist_upload("clip.mp4", b"bytes").await.unwrap();

        let mut stream = service.start_preview(&ticket.source_id, None).await.unwrap();
        let mut indices = Vec::new();
        while let Some(unit) = stream.next().await {
            assert_eq!(&unit.jpeg[..2], &[0xFF, 0xD8]);
            indices.push(unit.index);
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);

        let report = stream.close().await.unwrap();
        assert_eq!(report.frames_processed, 6);
    }

    #[tokio::test]
    async fn test_preview_disconnect_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1_000_000).await;
        let ticket = service.persist_upload("clip.mp4", b"bytes").await.unwrap();

        let mut stream = service.start_preview(&ticket.source_id, None).await.unwrap();
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());

        let err = stream.close().await.unwrap_err();
        assert!(err.is_cancelled());
        // cancelled previews leave the upload for a later batch run
        assert!(dir.path().join("uploads").join(&ticket.source_id).exists());
    }

    #[tokio::test]
    async fn test_preview_with_recording() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 4).await;
        let ticket = service.persist_upload("clip.mp4", b"bytes").await.unwrap();

        let mut stream = service
            .start_preview(&ticket.source_id, Some(&ticket.output_id))
            .await
            .unwrap();
        let mut count = 0;
        while stream.next().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
        stream.close().await.unwrap();

        let output = service.fetch_output(&ticket.output_id).await.unwrap();
        assert_eq!(std::fs::read_to_string(output.path).unwrap(), "4");
    }

    #[test]
    fn test_disposal_default_is_on_completion() {
        assert_eq!(Config::default().lifecycle.disposal, DisposalPolicy::OnCompletion);
    }
}
