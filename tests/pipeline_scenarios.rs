//! End-to-end sessions over synthetic sources.
//!
//! Sources and sinks are in-memory stand-ins for the FFmpeg processes, wired
//! in through a scripted `MediaBackend`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

use noise_camo::{
    composition::Compositor,
    config::{Config, DisposalPolicy, NoiseConfig, OutputConfig, Tier},
    error::{CamoError, VideoError},
    motion::{MotionMask, MotionSegmenter, Segmenter},
    noise::NoisePool,
    session::{FramePipeline, OutputTarget, ProgressSnapshot, SessionControls, SessionRequest, SessionRunner},
    video::{
        scaler::AdaptiveScaler, Frame, FrameSink, FrameSource, MediaBackend, Resolution, SyntheticSource,
        VideoMetadata,
    },
    SessionState,
};

const SEED: u64 = 4242;

/// Source that stops being readable once its backing file disappears,
/// or whose decoder breaks at a chosen frame
struct ScriptedSource {
    inner: SyntheticSource,
    backing_file: Option<PathBuf>,
    fail_read_at: Option<u64>,
    read: u64,
    closed: Arc<AtomicBool>,
}

impl FrameSource for ScriptedSource {
    fn metadata(&self) -> VideoMetadata {
        self.inner.metadata()
    }

    fn next_frame(&mut self) -> noise_camo::Result<Option<Frame>> {
        if let Some(path) = &self.backing_file {
            if !path.exists() {
                return Err(VideoError::DecodingFailed {
                    reason: format!("{} vanished", path.display()),
                }.into());
            }
        }
        if self.fail_read_at == Some(self.read) {
            return Err(VideoError::DecodingFailed { reason: "decoder exit status: 1".to_string() }.into());
        }
        self.read += 1;
        self.inner.next_frame()
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close();
    }
}

#[derive(Default)]
struct SinkLog {
    indices: Vec<u64>,
    resolutions: Vec<Resolution>,
    /// Only filled when the backend keeps frames
    frames: Vec<(u64, Frame)>,
    progress_seen: Vec<ProgressSnapshot>,
}

struct ScriptedSink {
    log: Arc<Mutex<SinkLog>>,
    closed: Arc<AtomicBool>,
    fail_at: Option<u64>,
    keep_frames: bool,
    progress: Option<watch::Receiver<ProgressSnapshot>>,
}

impl FrameSink for ScriptedSink {
    fn write_frame(&mut self, frame: &Frame, index: u64) -> noise_camo::Result<()> {
        if self.fail_at == Some(index) {
            return Err(VideoError::WriteFailure { reason: "disk full".to_string() }.into());
        }
        let mut log = self.log.lock().unwrap();
        log.indices.push(index);
        log.resolutions.push(frame.resolution());
        if self.keep_frames {
            log.frames.push((index, frame.clone()));
        }
        if let Some(rx) = &self.progress {
            log.progress_seen.push(*rx.borrow());
        }
        Ok(())
    }

    fn close(&mut self) -> noise_camo::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedBackend {
    source: SyntheticSource,
    backing_file: Option<PathBuf>,
    fail_read_at: Option<u64>,
    fail_write_at: Option<u64>,
    keep_frames: bool,
    progress: Option<watch::Receiver<ProgressSnapshot>>,
    log: Arc<Mutex<SinkLog>>,
    source_closed: Arc<AtomicBool>,
    sink_closed: Arc<AtomicBool>,
}

impl ScriptedBackend {
    fn new(source: SyntheticSource) -> Self {
        Self {
            source,
            backing_file: None,
            fail_read_at: None,
            fail_write_at: None,
            keep_frames: true,
            progress: None,
            log: Arc::default(),
            source_closed: Arc::default(),
            sink_closed: Arc::default(),
        }
    }
}

impl MediaBackend for ScriptedBackend {
    fn open_source(&self, _path: &Path) -> noise_camo::Result<Box<dyn FrameSource>> {
        Ok(Box::new(ScriptedSource {
            inner: self.source.clone(),
            backing_file: self.backing_file.clone(),
            fail_read_at: self.fail_read_at,
            read: 0,
            closed: self.source_closed.clone(),
        }))
    }

    fn open_writer(
        &self,
        _path: &Path,
        _resolution: Resolution,
        _fps: f64,
        _config: &OutputConfig,
    ) -> noise_camo::Result<Box<dyn FrameSink>> {
        Ok(Box::new(ScriptedSink {
            log: self.log.clone(),
            closed: self.sink_closed.clone(),
            fail_at: self.fail_write_at,
            keep_frames: self.keep_frames,
            progress: self.progress.clone(),
        }))
    }
}

fn config() -> Config {
    let mut config = Config {
        noise: NoiseConfig { seed: Some(SEED), monochrome: false },
        ..Config::default()
    };
    config.lifecycle.disposal = DisposalPolicy::Never;
    config
}

fn file_request(tier: Tier) -> SessionRequest {
    SessionRequest {
        id: format!("{}-test", tier),
        tier,
        source: PathBuf::from("raw_0_source.mp4"),
        target: OutputTarget::File(PathBuf::from("out_0.mp4")),
    }
}

fn run(backend: ScriptedBackend, config: Config, request: SessionRequest, controls: SessionControls)
    -> (noise_camo::Result<noise_camo::SessionReport>, ScriptedBackendParts) {
    let parts = ScriptedBackendParts {
        log: backend.log.clone(),
        source_closed: backend.source_closed.clone(),
        sink_closed: backend.sink_closed.clone(),
    };
    let runner = SessionRunner::new(Arc::new(config), Arc::new(backend));
    (runner.run(request, controls), parts)
}

struct ScriptedBackendParts {
    log: Arc<Mutex<SinkLog>>,
    source_closed: Arc<AtomicBool>,
    sink_closed: Arc<AtomicBool>,
}

/// Scenario A: full HD source is processed at 1280x720, every frame written
#[test]
fn full_hd_batch_writes_every_frame_at_720p() {
    let source = SyntheticSource::new(1920, 1080, 30.0, 90).with_moving_square(160, 12);
    let mut backend = ScriptedBackend::new(source);
    backend.keep_frames = false;
    let (result, parts) = run(backend, config(), file_request(Tier::Batch), SessionControls::detached());

    let report = result.unwrap();
    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.frames_processed, 90);
    assert_eq!(report.target, Resolution::new(1280, 720));
    assert_eq!(report.fps, 30.0);

    let log = parts.log.lock().unwrap();
    assert_eq!(log.indices.len(), 90);
    assert!(log.resolutions.iter().all(|r| *r == Resolution::new(1280, 720)));
}

/// Scenario B: a static source never shows anything but background noise
#[test]
fn static_source_is_pure_background_noise() {
    for tier in [Tier::Preview, Tier::Batch] {
        let source = SyntheticSource::new(320, 240, 30.0, 10);
        let cfg = config();
        let pool_size = cfg.tier(tier).pool_size;
        let expected = NoisePool::generate(Resolution::new(320, 240), pool_size, &cfg.noise).unwrap();

        let (result, parts) = run(ScriptedBackend::new(source), cfg, file_request(tier), SessionControls::detached());
        assert_eq!(result.unwrap().frames_processed, 10);

        let log = parts.log.lock().unwrap();
        assert_eq!(log.frames.len(), 10);
        for (_, frame) in &log.frames {
            assert_eq!(frame, expected.background(), "{} tier leaked motion", tier);
        }
    }
}

/// Scenario C: the source disappears mid-preview; the sequence ends cleanly
#[test]
fn preview_ends_cleanly_when_source_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let upload = dir.path().join("raw_1_clip.mp4");
    std::fs::write(&upload, b"placeholder").unwrap();

    let mut backend = ScriptedBackend::new(SyntheticSource::new(64, 48, 30.0, 100).with_moving_square(8, 2));
    backend.backing_file = Some(upload.clone());

    let (sender, mut units) = mpsc::channel(1);
    let request = SessionRequest {
        id: "preview-c".to_string(),
        tier: Tier::Preview,
        source: upload.clone(),
        target: OutputTarget::Live { sender, record: None },
    };

    let mut cfg = config();
    cfg.lifecycle.disposal = DisposalPolicy::Always;
    let runner = SessionRunner::new(Arc::new(cfg), Arc::new(backend));
    let session = std::thread::spawn(move || runner.run(request, SessionControls::detached()));

    let mut received = Vec::new();
    while let Some(unit) = units.blocking_recv() {
        received.push(unit.index);
        if received.len() == 5 {
            // a concurrent batch teardown removes the upload
            std::fs::remove_file(&upload).unwrap();
        }
    }

    let report = session.join().unwrap().unwrap();
    assert_eq!(report.state, SessionState::Completed);
    assert!(report.truncated);
    // already gone, so nothing to dispose of
    assert!(report.disposal.is_none());
    assert!(received.len() >= 5 && received.len() < 100);
    assert_eq!(report.frames_processed, received.len() as u64);
    assert_eq!(received, (0..received.len() as u64).collect::<Vec<_>>());
}

#[test]
fn decoder_failure_with_source_present_fails_and_keeps_upload() {
    let dir = tempfile::tempdir().unwrap();
    let upload = dir.path().join("raw_2_clip.mp4");
    std::fs::write(&upload, b"placeholder").unwrap();

    let mut backend = ScriptedBackend::new(SyntheticSource::new(64, 48, 30.0, 90).with_moving_square(8, 2));
    backend.backing_file = Some(upload.clone());
    backend.fail_read_at = Some(2);

    let mut cfg = config();
    cfg.lifecycle.disposal = DisposalPolicy::OnCompletion;
    let request = SessionRequest {
        id: "batch-broken".to_string(),
        tier: Tier::Batch,
        source: upload.clone(),
        target: OutputTarget::File(PathBuf::from("out_2.mp4")),
    };
    let (result, parts) = run(backend, cfg, request, SessionControls::detached());

    let err = result.unwrap_err();
    assert!(matches!(err, CamoError::Video(VideoError::DecodingFailed { .. })));
    assert!(upload.exists());
    assert!(parts.source_closed.load(Ordering::SeqCst));
    assert!(parts.sink_closed.load(Ordering::SeqCst));
    assert_eq!(parts.log.lock().unwrap().indices, vec![0, 1]);
}

#[test]
fn forced_write_failure_releases_both_handles() {
    let mut backend = ScriptedBackend::new(SyntheticSource::new(64, 48, 30.0, 50).with_moving_square(8, 2));
    backend.fail_write_at = Some(7);

    let (result, parts) = run(backend, config(), file_request(Tier::Batch), SessionControls::detached());

    let err = result.unwrap_err();
    assert!(matches!(err, CamoError::Video(VideoError::WriteFailure { .. })));
    assert!(parts.source_closed.load(Ordering::SeqCst));
    assert!(parts.sink_closed.load(Ordering::SeqCst));
    assert_eq!(parts.log.lock().unwrap().indices, (0..7).collect::<Vec<_>>());
}

#[test]
fn output_pixels_are_always_noise() {
    let source = SyntheticSource::new(96, 64, 30.0, 24).with_moving_square(16, 5);
    let cfg = config();

    for tier in [Tier::Preview, Tier::Batch] {
        let pool = NoisePool::generate(Resolution::new(96, 64), cfg.tier(tier).pool_size, &cfg.noise).unwrap();
        let (result, parts) = run(ScriptedBackend::new(source.clone()), cfg.clone(), file_request(tier), SessionControls::detached());
        result.unwrap();

        let log = parts.log.lock().unwrap();
        let mut motion_seen = false;
        for (index, frame) in &log.frames {
            let entry = pool.entry(*index);
            for y in 0..64 {
                for x in 0..96 {
                    let px = frame.get_pixel(x, y);
                    let from_pool = px == entry.get_pixel(x, y);
                    let from_background = px == pool.background().get_pixel(x, y);
                    assert!(from_pool || from_background, "pixel ({}, {}) of frame {}", x, y, index);
                    if !from_background {
                        motion_seen = true;
                    }
                }
            }
        }
        assert!(motion_seen, "{} tier never detected the moving square", tier);
    }
}

/// Marks every pixel as motion, so the composite is the pool entry itself
struct EverythingMoves;

impl MotionSegmenter for EverythingMoves {
    fn name(&self) -> &str {
        "everything_moves"
    }

    fn segment(&mut self, frame: &Frame) -> noise_camo::Result<MotionMask> {
        Ok(MotionMask::from_fn(frame.width(), frame.height(), |_, _| true))
    }
}

#[test]
fn pool_is_never_regenerated() {
    let resolution = Resolution::new(40, 30);
    let pool_size = 10u64;
    let pool = NoisePool::generate(resolution, pool_size as usize, &config().noise).unwrap();
    let scaler = AdaptiveScaler::new(resolution, &config().scaling).unwrap();
    let segmenter = Segmenter::with_strategy(Box::new(EverythingMoves), None);
    let mut pipeline = FramePipeline::new(scaler, segmenter, Compositor::new(pool));

    let source = SyntheticSource::new(40, 30, 30.0, 40).with_moving_square(6, 3);
    let outputs: Vec<Frame> = (0..3 * pool_size)
        .map(|i| pipeline.process(source.render(i), i).unwrap())
        .collect();

    for k in 0..pool_size as usize {
        assert_eq!(outputs[k], outputs[k + pool_size as usize]);
        assert_eq!(outputs[k], outputs[k + 2 * pool_size as usize]);
    }
    assert_ne!(outputs[0], outputs[1]);
}

#[test]
fn frame_index_and_progress_are_monotonic() {
    let mut cfg = config();
    cfg.lifecycle.progress_interval_ms = 0;

    let (controls, progress) = SessionControls::new();
    let mut backend = ScriptedBackend::new(SyntheticSource::new(48, 32, 30.0, 30).with_moving_square(6, 2));
    backend.progress = Some(progress.clone());

    let (result, parts) = run(backend, cfg, file_request(Tier::Batch), controls);
    result.unwrap();

    let log = parts.log.lock().unwrap();
    assert_eq!(log.indices, (0..30).collect::<Vec<_>>());

    let mut last = 0.0;
    for snapshot in &log.progress_seen {
        let pct = snapshot.percent.unwrap();
        assert!((0.0..=100.0).contains(&pct));
        assert!(pct >= last);
        last = pct;
    }
    assert_eq!(*progress.borrow(), ProgressSnapshot::new(30, 30));
}

#[test]
fn unknown_length_source_reports_no_percent() {
    let source = SyntheticSource::new(32, 24, 30.0, 12).with_unknown_length();
    let (controls, progress) = SessionControls::new();
    let (result, _) = run(ScriptedBackend::new(source), config(), file_request(Tier::Batch), controls);

    assert_eq!(result.unwrap().frames_processed, 12);
    let last = *progress.borrow();
    assert_eq!(last.frame_index, 12);
    assert_eq!(last.percent, None);
}
