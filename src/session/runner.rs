use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn};

use crate::config::{Config, DisposalPolicy, Tier};
use crate::error::{DisposalWarning, Result, SessionError};
use crate::session::pipeline::FramePipeline;
use crate::session::progress::{ProgressSnapshot, ProgressTracker};
use crate::session::{CancelFlag, Session, SessionReport, SessionState};
use crate::video::backend::MediaBackend;
use crate::video::preview::{PreviewEmitter, PreviewUnit};
use crate::video::sink::{FanoutSink, FrameSink};
use crate::video::source::FrameSource;

/// Where composited frames go
#[derive(Debug)]
pub enum OutputTarget {
    /// Encode into a container file
    File(PathBuf),
    /// Emit JPEG units on a channel, optionally recording a container as well
    Live {
        sender: mpsc::Sender<PreviewUnit>,
        record: Option<PathBuf>,
    },
}

impl OutputTarget {
    fn container_path(&self) -> Option<PathBuf> {
        match self {
            Self::File(path) => Some(path.clone()),
            Self::Live { record, .. } => record.clone(),
        }
    }
}

/// Everything needed to start one session
#[derive(Debug)]
pub struct SessionRequest {
    pub id: String,
    pub tier: Tier,
    pub source: PathBuf,
    pub target: OutputTarget,
}

/// Caller-side levers on a running session
#[derive(Debug)]
pub struct SessionControls {
    pub cancel: CancelFlag,
    pub progress: watch::Sender<ProgressSnapshot>,
}

impl SessionControls {
    pub fn new() -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (progress, receiver) = watch::channel(ProgressSnapshot::new(0, 0));
        (Self { cancel: CancelFlag::new(), progress }, receiver)
    }

    /// Controls nobody observes
    pub fn detached() -> Self {
        Self::new().0
    }
}

/// Drives sessions from open to teardown on the calling thread.
///
/// `run` blocks for the whole session; async callers put it on a blocking
/// task.
#[derive(Clone)]
pub struct SessionRunner {
    config: Arc<Config>,
    backend: Arc<dyn MediaBackend>,
}

impl SessionRunner {
    pub fn new(config: Arc<Config>, backend: Arc<dyn MediaBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a session to a terminal state.
    ///
    /// Returns the report for `Completed`; `Failed` and `Cancelled` come back
    /// as errors after teardown has released the source and sink.
    pub fn run(&self, request: SessionRequest, controls: SessionControls) -> Result<SessionReport> {
        let span = info_span!("session", id = %request.id, tier = %request.tier);
        let _enter = span.enter();

        let result = self.run_session(request, controls);
        if let Err(e) = &result {
            if e.is_cancelled() {
                info!("🛑 Session cancelled");
            } else {
                error!("❌ Session failed: {}", e);
            }
        }
        result
    }

    fn run_session(&self, request: SessionRequest, controls: SessionControls) -> Result<SessionReport> {
        info!("🎬 Opening {}", request.source.display());

        // Opening: nothing to release if the source never opened
        let mut source = self.backend.open_source(&request.source)?;
        let metadata = source.metadata();

        let opened = FramePipeline::for_tier(metadata.resolution(), request.tier, &self.config)
            .and_then(|pipeline| {
                let session = Session::new(
                    request.id.clone(),
                    request.tier,
                    request.source.clone(),
                    request.target.container_path(),
                    &metadata,
                    pipeline.scaler(),
                );
                let sink = self.open_sink(request.target, &session)?;
                Ok((pipeline, session, sink))
            });
        let (mut pipeline, mut session, mut sink) = match opened {
            Ok(parts) => parts,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };

        info!(
            "   {} @ {:.2} fps, {} frames -> {} ({})",
            session.original(),
            session.fps(),
            if session.frame_count() > 0 { session.frame_count().to_string() } else { "?".to_string() },
            session.target(),
            pipeline.segmenter_name()
        );

        session.transition(SessionState::Running);
        let mut tracker = ProgressTracker::new(
            session.frame_count(),
            self.config.lifecycle.progress_interval(),
            controls.progress,
        );

        let outcome = pump(
            &mut session,
            &mut pipeline,
            source.as_mut(),
            sink.as_mut(),
            &controls.cancel,
            &mut tracker,
        );

        // Teardown runs on every exit path
        source.close();
        let closed = sink.close();
        drop(sink);
        tracker.finish(session.frame_index());

        let failure = match (outcome, closed) {
            (Ok(()), Ok(())) => None,
            (Ok(()), Err(e)) => Some(e),
            (Err(e), Ok(())) => Some(e),
            (Err(e), Err(close_err)) => {
                warn!("Sink close after failure also failed: {}", close_err);
                Some(e)
            }
        };
        let state = match &failure {
            None => SessionState::Completed,
            Some(e) if e.is_cancelled() => SessionState::Cancelled,
            Some(_) => SessionState::Failed,
        };
        session.transition(state);

        // A truncated source has already been removed
        let disposal = if session.truncated() {
            None
        } else {
            dispose_source(session.source(), self.config.lifecycle.disposal, state)
        };
        let report = session.report(disposal);

        match failure {
            None => {
                info!("✅ Session complete: {} frames at {}", report.frames_processed, report.target);
                Ok(report)
            }
            Some(e) => Err(e),
        }
    }

    fn open_sink(&self, target: OutputTarget, session: &Session) -> Result<Box<dyn FrameSink>> {
        let output = &self.config.output;
        match target {
            OutputTarget::File(path) => {
                self.backend.open_writer(&path, session.target(), session.fps(), output)
            }
            OutputTarget::Live { sender, record: None } => {
                Ok(Box::new(PreviewEmitter::new(sender, output.jpeg_quality)))
            }
            OutputTarget::Live { sender, record: Some(path) } => {
                let writer = self.backend.open_writer(&path, session.target(), session.fps(), output)?;
                let emitter: Box<dyn FrameSink> = Box::new(PreviewEmitter::new(sender, output.jpeg_quality));
                Ok(Box::new(FanoutSink::new(vec![emitter, writer])))
            }
        }
    }
}

/// The pull loop. Returns once the source is exhausted or something fails.
fn pump(
    session: &mut Session,
    pipeline: &mut FramePipeline,
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    cancel: &CancelFlag,
    tracker: &mut ProgressTracker,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled.into());
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("End of stream after {} frames", session.frame_index());
                return Ok(());
            }
            // A concurrent session may delete the upload while this one reads it
            Err(e) if !session.source().exists() => {
                warn!("Source removed at frame {}, ending stream: {}", session.frame_index(), e);
                session.mark_truncated();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let index = session.frame_index();
        let composite = pipeline.process(frame, index)?;
        sink.write_frame(&composite, index)?;
        let done = session.advance();
        tracker.record(done);
    }
}

fn should_dispose(policy: DisposalPolicy, state: SessionState) -> bool {
    match policy {
        DisposalPolicy::Always => true,
        DisposalPolicy::OnCompletion => state == SessionState::Completed,
        DisposalPolicy::Never => false,
    }
}

/// Delete the source per policy; failure is reported, never raised
fn dispose_source(path: &Path, policy: DisposalPolicy, state: SessionState) -> Option<DisposalWarning> {
    if !should_dispose(policy, state) {
        return None;
    }

    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed source {}", path.display());
            None
        }
        Err(e) => {
            let warning = DisposalWarning {
                path: path.display().to_string(),
                reason: e.to_string(),
            };
            warn!("{}", warning);
            Some(warning)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::config::{NoiseConfig, OutputConfig};
    use crate::error::{CamoError, VideoError};
    use crate::video::synthetic::SyntheticSource;
    use crate::video::types::{Frame, Resolution};

    #[derive(Default)]
    struct Recorded {
        frames: Vec<(u64, Frame)>,
        closed: bool,
    }

    struct RecordingSink(Arc<Mutex<Recorded>>);

    impl FrameSink for RecordingSink {
        fn write_frame(&mut self, frame: &Frame, index: u64) -> Result<()> {
            self.0.lock().unwrap().frames.push((index, frame.clone()));
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.0.lock().unwrap().closed = true;
            Ok(())
        }
    }

    /// Decodes a few frames, then reports a decoder error
    struct BrokenSource {
        inner: SyntheticSource,
        fail_at: u64,
        read: u64,
    }

    impl FrameSource for BrokenSource {
        fn metadata(&self) -> crate::video::types::VideoMetadata {
            self.inner.metadata()
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.read == self.fail_at {
                return Err(VideoError::DecodingFailed { reason: "decoder exit status: 1".to_string() }.into());
            }
            self.read += 1;
            self.inner.next_frame()
        }

        fn close(&mut self) {}
    }

    /// Refuses every frame and fails to finalize as well
    struct BrokenSink;

    impl FrameSink for BrokenSink {
        fn write_frame(&mut self, _: &Frame, _: u64) -> Result<()> {
            Err(VideoError::WriteFailure { reason: "disk full".to_string() }.into())
        }

        fn close(&mut self) -> Result<()> {
            Err(VideoError::WriteFailure { reason: "trailer not written".to_string() }.into())
        }
    }

    struct BrokenSinkBackend;

    impl MediaBackend for BrokenSinkBackend {
        fn open_source(&self, _: &Path) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(SyntheticSource::new(16, 16, 24.0, 4)))
        }

        fn open_writer(&self, _: &Path, _: Resolution, _: f64, _: &OutputConfig) -> Result<Box<dyn FrameSink>> {
            Ok(Box::new(BrokenSink))
        }
    }

    struct TestBackend {
        frames: u64,
        fail_read_at: Option<u64>,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl MediaBackend for TestBackend {
        fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
            if path.to_string_lossy().contains("missing") {
                return Err(VideoError::NotReadable {
                    path: path.display().to_string(),
                    reason: "no such file".to_string(),
                }.into());
            }
            let inner = SyntheticSource::new(48, 32, 24.0, self.frames).with_moving_square(6, 3);
            match self.fail_read_at {
                Some(fail_at) => Ok(Box::new(BrokenSource { inner, fail_at, read: 0 })),
                None => Ok(Box::new(inner)),
            }
        }

        fn open_writer(&self, _: &Path, _: Resolution, _: f64, _: &OutputConfig) -> Result<Box<dyn FrameSink>> {
            Ok(Box::new(RecordingSink(self.recorded.clone())))
        }
    }

    fn runner(frames: u64, disposal: DisposalPolicy) -> (SessionRunner, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let mut config = Config {
            noise: NoiseConfig { seed: Some(1), monochrome: false },
            ..Config::default()
        };
        config.lifecycle.disposal = disposal;
        let backend = TestBackend { frames, fail_read_at: None, recorded: recorded.clone() };
        (SessionRunner::new(Arc::new(config), Arc::new(backend)), recorded)
    }

    fn request(source: &str) -> SessionRequest {
        SessionRequest {
            id: "t".to_string(),
            tier: Tier::Batch,
            source: PathBuf::from(source),
            target: OutputTarget::File(PathBuf::from("out.mp4")),
        }
    }

    #[test]
    fn test_completed_session_writes_every_frame() {
        let (runner, recorded) = runner(12, DisposalPolicy::Never);
        let report = runner.run(request("raw.mp4"), SessionControls::detached()).unwrap();

        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.frames_processed, 12);
        assert_eq!(report.fps, 24.0);
        assert!(!report.truncated);

        let recorded = recorded.lock().unwrap();
        assert!(recorded.closed);
        let indices: Vec<u64> = recorded.frames.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_unreadable_source_fails_at_open() {
        let (runner, recorded) = runner(5, DisposalPolicy::Never);
        let err = runner.run(request("missing.mp4"), SessionControls::detached()).unwrap_err();
        assert!(matches!(err, CamoError::Video(VideoError::NotReadable { .. })));
        assert!(recorded.lock().unwrap().frames.is_empty());
    }

    #[test]
    fn test_cancel_before_first_frame() {
        let (runner, recorded) = runner(5, DisposalPolicy::Never);
        let controls = SessionControls::detached();
        controls.cancel.cancel();
        let err = runner.run(request("raw.mp4"), controls).unwrap_err();
        assert!(err.is_cancelled());
        assert!(recorded.lock().unwrap().closed);
    }

    #[test]
    fn test_final_progress_published() {
        let (runner, _) = runner(9, DisposalPolicy::Never);
        let (controls, progress) = SessionControls::new();
        runner.run(request("raw.mp4"), controls).unwrap();
        assert_eq!(*progress.borrow(), ProgressSnapshot::new(9, 9));
    }

    #[test]
    fn test_disposal_removes_source_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw_1_clip.mp4");
        std::fs::write(&source, b"stand-in").unwrap();

        let (runner, _) = runner(3, DisposalPolicy::OnCompletion);
        let report = runner.run(request(source.to_str().unwrap()), SessionControls::detached()).unwrap();
        assert!(report.disposal.is_none());
        assert!(!source.exists());
    }

    #[test]
    fn test_disposal_failure_is_only_a_warning() {
        let (runner, _) = runner(3, DisposalPolicy::Always);
        let report = runner.run(request("/nonexistent/raw.mp4"), SessionControls::detached()).unwrap();
        assert_eq!(report.state, SessionState::Completed);
        assert!(report.disposal.is_some());
    }

    #[test]
    fn test_decoder_error_fails_and_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw_1_clip.mp4");
        std::fs::write(&source, b"stand-in").unwrap();

        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let mut config = Config::default();
        config.lifecycle.disposal = DisposalPolicy::OnCompletion;
        let backend = TestBackend { frames: 90, fail_read_at: Some(2), recorded: recorded.clone() };
        let runner = SessionRunner::new(Arc::new(config), Arc::new(backend));

        let err = runner.run(request(source.to_str().unwrap()), SessionControls::detached()).unwrap_err();
        assert!(matches!(err, CamoError::Video(VideoError::DecodingFailed { .. })));
        assert!(source.exists());

        let recorded = recorded.lock().unwrap();
        assert!(recorded.closed);
        assert_eq!(recorded.frames.len(), 2);
    }

    #[test]
    fn test_write_error_wins_over_close_error() {
        let runner = SessionRunner::new(Arc::new(Config::default()), Arc::new(BrokenSinkBackend));
        let err = runner.run(request("raw.mp4"), SessionControls::detached()).unwrap_err();
        match err {
            CamoError::Video(VideoError::WriteFailure { reason }) => assert_eq!(reason, "disk full"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_dispose_policy_table() {
        assert!(should_dispose(DisposalPolicy::Always, SessionState::Failed));
        assert!(should_dispose(DisposalPolicy::OnCompletion, SessionState::Completed));
        assert!(!should_dispose(DisposalPolicy::OnCompletion, SessionState::Cancelled));
        assert!(!should_dispose(DisposalPolicy::Never, SessionState::Completed));
    }
}
