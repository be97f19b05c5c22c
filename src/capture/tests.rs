use super::*;
use crate::config::{CamerasConfig, RecordingConfig};
use crate::error::{CaptureError, TelearmError};
use crate::frame::{FrameData, FrameFormat};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

/// Frame source that emits small RGB frames at a gentle pace, optionally
/// erroring after a fixed number of frames.
struct ScriptedSource {
    width: u32,
    height: u32,
    frames_before_error: Option<u32>,
    emitted: u32,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<FrameData, CaptureError> {
        std::thread::sleep(Duration::from_millis(2));

        if let Some(limit) = self.frames_before_error {
            if self.emitted >= limit {
                return Err(CaptureError::FrameRead {
                    details: "scripted stream loss".to_string(),
                });
            }
        }

        let frame = FrameData::new(
            self.emitted as u64,
            SystemTime::now(),
            vec![0u8; (self.width * self.height * 3) as usize],
            self.width,
            self.height,
            FrameFormat::Rgb24,
        );
        self.emitted += 1;
        Ok(frame)
    }
}

/// Factory that fails the first `fail_opens` open calls, then produces
/// scripted sources. Counts every open attempt.
struct FlakySourceFactory {
    fail_opens: u32,
    opens: AtomicU32,
    frames_before_error: Option<u32>,
}

impl FlakySourceFactory {
    fn new(fail_opens: u32) -> Self {
        Self {
            fail_opens,
            opens: AtomicU32::new(0),
            frames_before_error: None,
        }
    }

    fn with_frames_before_error(mut self, frames: u32) -> Self {
        self.frames_before_error = Some(frames);
        self
    }

    fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl FrameSourceFactory for FlakySourceFactory {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_opens {
            return Err(CaptureError::SourceOpen {
                locator: locator.to_string(),
                details: "scripted open failure".to_string(),
            });
        }
        Ok(Box::new(ScriptedSource {
            width: 32,
            height: 24,
            frames_before_error: self.frames_before_error,
            emitted: 0,
        }))
    }
}

/// Encoder that collects written frames into shared memory
#[derive(Default)]
struct CollectingEncoder {
    frames: Arc<Mutex<Vec<FrameData>>>,
}

impl FrameEncoder for CollectingEncoder {
    fn write_frame(&mut self, frame: &FrameData) -> Result<(), CaptureError> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }

    fn release(&mut self) {}
}

struct CollectingEncoderFactory {
    frames: Arc<Mutex<Vec<FrameData>>>,
}

impl CollectingEncoderFactory {
    fn new() -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl FrameEncoderFactory for CollectingEncoderFactory {
    fn create(
        &self,
        _path: &std::path::Path,
        _fps: u32,
        _resolution: (u32, u32),
    ) -> Result<Box<dyn FrameEncoder>, CaptureError> {
        Ok(Box::new(CollectingEncoder {
            frames: Arc::clone(&self.frames),
        }))
    }

    fn file_extension(&self) -> &'static str {
        "raw"
    }
}

fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        delay: Duration::from_millis(20),
    }
}

fn preview_descriptor(id: usize) -> CaptureDescriptor {
    CaptureDescriptor {
        id,
        locator: format!("mock://{}", id),
        target_fps: 30,
        target_resolution: (16, 12),
        output_path: None,
    }
}

async fn wait_for_state(session: &CaptureSession, wanted: CaptureState, max: Duration) -> bool {
    let deadline = Instant::now() + max;
    while Instant::now() < deadline {
        if session.state() == wanted {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    session.state() == wanted
}

#[tokio::test]
async fn test_session_running_after_k_failed_opens() {
    let factory = Arc::new(FlakySourceFactory::new(3));
    let started = Instant::now();

    let mut session = CaptureSession::start(
        preview_descriptor(0),
        fast_policy(5),
        Arc::clone(&factory) as Arc<dyn FrameSourceFactory>,
        None,
    );

    assert!(session.wait_until_running(Duration::from_secs(2)).await);

    // k failures then success: exactly k+1 open attempts, with the
    // configured delay between them
    assert_eq!(factory.open_count(), 4);
    assert!(started.elapsed() >= Duration::from_millis(3 * 20));

    session.stop().await;
    assert_eq!(session.state(), CaptureState::Stopped);
}

#[tokio::test]
async fn test_session_fails_after_exhausted_attempts() {
    let factory = Arc::new(FlakySourceFactory::new(u32::MAX));

    let mut session = CaptureSession::start(
        preview_descriptor(0),
        fast_policy(5),
        Arc::clone(&factory) as Arc<dyn FrameSourceFactory>,
        None,
    );

    assert!(!session.wait_until_running(Duration::from_secs(2)).await);
    assert!(wait_for_state(&session, CaptureState::Failed, Duration::from_secs(1)).await);
    assert_eq!(factory.open_count(), 5);

    // The worker has already exited; stop stays a cheap no-op
    session.stop().await;
    assert_eq!(session.state(), CaptureState::Failed);
}

#[tokio::test]
async fn test_preview_mode_latest_frame_never_blocks() {
    // Fails once so there is a window with no frame published yet
    let factory = Arc::new(FlakySourceFactory::new(1));

    let mut session = CaptureSession::start(
        preview_descriptor(0),
        fast_policy(5),
        Arc::clone(&factory) as Arc<dyn FrameSourceFactory>,
        None,
    );

    // No frame has ever arrived: read returns None immediately
    assert!(session.latest_frame().is_none());

    assert!(session.wait_until_running(Duration::from_secs(2)).await);

    let deadline = Instant::now() + Duration::from_secs(1);
    while session.latest_frame().is_none() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let frame = session.latest_frame().expect("frame expected");
    assert_eq!(frame.width, 16);
    assert_eq!(frame.height, 12);

    session.stop().await;
}

#[tokio::test]
async fn test_frames_resized_and_forwarded_to_encoder() {
    let source_factory = Arc::new(FlakySourceFactory::new(0));
    let encoder_factory = Arc::new(CollectingEncoderFactory::new());
    let collected = Arc::clone(&encoder_factory.frames);

    let descriptor = CaptureDescriptor {
        output_path: Some(std::env::temp_dir().join("unused.raw")),
        ..preview_descriptor(0)
    };

    let mut session = CaptureSession::start(
        descriptor,
        fast_policy(5),
        source_factory as Arc<dyn FrameSourceFactory>,
        Some(encoder_factory as Arc<dyn FrameEncoderFactory>),
    );

    assert!(session.wait_until_running(Duration::from_secs(2)).await);

    let deadline = Instant::now() + Duration::from_secs(1);
    while collected.lock().len() < 3 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    session.stop().await;

    let frames = collected.lock();
    assert!(frames.len() >= 3, "encoder saw {} frames", frames.len());
    // Sources emit 32x24; the session resizes to the 16x12 target
    for frame in frames.iter() {
        assert_eq!((frame.width, frame.height), (16, 12));
        assert!(frame.validate_size());
    }
}

#[tokio::test]
async fn test_lost_source_reconnects_in_place() {
    // Every connection delivers two frames then dies; reopen always works
    let factory = Arc::new(FlakySourceFactory::new(0).with_frames_before_error(2));

    let mut session = CaptureSession::start(
        preview_descriptor(0),
        fast_policy(5),
        Arc::clone(&factory) as Arc<dyn FrameSourceFactory>,
        None,
    );

    assert!(session.wait_until_running(Duration::from_secs(2)).await);

    // Wait until at least one loss/reopen cycle happened
    let deadline = Instant::now() + Duration::from_secs(2);
    while factory.open_count() < 2 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(factory.open_count() >= 2, "session never reconnected");

    // And it is healthy again after the reconnect
    assert!(session.wait_until_running(Duration::from_secs(2)).await);

    session.stop().await;
    assert_eq!(session.state(), CaptureState::Stopped);
}

fn manager_configs(dir: &TempDir, sources: Vec<String>) -> (RecordingConfig, CamerasConfig) {
    (
        RecordingConfig {
            root_dir: dir.path().join("recordings").to_string_lossy().to_string(),
            ready_timeout_secs: 2,
            reconnect_delay_secs: 1,
            reconnect_attempts: 3,
        },
        CamerasConfig {
            sources,
            target_fps: 30,
            target_resolution: (16, 12),
        },
    )
}

fn mock_factories() -> (Arc<dyn FrameSourceFactory>, Arc<dyn FrameEncoderFactory>) {
    (
        Arc::new(FlakySourceFactory::new(0)),
        Arc::new(MjpegEncoderFactory::new()),
    )
}

#[tokio::test]
async fn test_manager_no_sources_is_noop() {
    let dir = TempDir::new().unwrap();
    let (recording, cameras) = manager_configs(&dir, vec![]);
    let (sf, ef) = mock_factories();

    let mut manager = RecordingSessionManager::new(&recording, &cameras, sf, ef);
    manager.start().await.unwrap();
    assert!(!manager.is_recording());

    // Stop without a session is a warning no-op and keeps the id
    manager.stop().await;
    assert_eq!(manager.session_id(), 0);
}

#[tokio::test]
async fn test_manager_double_start_rejected() {
    let dir = TempDir::new().unwrap();
    let (recording, cameras) = manager_configs(&dir, vec!["mock://0".to_string()]);
    let (sf, ef) = mock_factories();

    let mut manager = RecordingSessionManager::new(&recording, &cameras, sf, ef);
    manager.start().await.unwrap();

    match manager.start().await {
        Err(TelearmError::Capture(CaptureError::SessionActive)) => {}
        other => panic!("expected SessionActive, got {:?}", other),
    }

    manager.stop().await;
}

#[tokio::test]
async fn test_end_to_end_two_cameras_two_sessions() {
    let dir = TempDir::new().unwrap();
    let (recording, cameras) = manager_configs(
        &dir,
        vec!["mock://0".to_string(), "mock://1".to_string()],
    );
    let (sf, ef) = mock_factories();

    let mut manager = RecordingSessionManager::new(&recording, &cameras, sf, ef);
    assert_eq!(manager.session_id(), 0);
    assert_eq!(manager.source_count(), 2);

    // First session records into directory "0"
    manager.start().await.unwrap();
    assert!(manager.is_recording());
    {
        let sessions = manager.active_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        for session in sessions {
            assert_eq!(session.state(), CaptureState::Running);
        }
    }

    // Let some frames land in the encoders
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.stop().await;
    assert!(!manager.is_recording());
    assert_eq!(manager.session_id(), 1);

    let session0 = dir.path().join("recordings/0");
    for cam in 0..2 {
        let file = session0.join(format!("{}.mjpeg", cam));
        assert!(file.exists(), "missing {}", file.display());
        assert!(file.metadata().unwrap().len() > 0);
    }

    // Second session lands in directory "1"
    manager.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.stop().await;
    assert_eq!(manager.session_id(), 2);

    let session1 = dir.path().join("recordings/1");
    for cam in 0..2 {
        assert!(session1.join(format!("{}.mjpeg", cam)).exists());
    }

    // A fresh manager re-derives the id by counting session directories
    let (recording, cameras) = manager_configs(&dir, vec!["mock://0".to_string()]);
    let (sf, ef) = mock_factories();
    let manager = RecordingSessionManager::new(&recording, &cameras, sf, ef);
    assert_eq!(manager.session_id(), 2);
}

#[tokio::test]
async fn test_manager_skips_session_that_never_readies() {
    let dir = TempDir::new().unwrap();
    let (mut recording, cameras) = manager_configs(
        &dir,
        vec!["mock://good".to_string(), "mock://bad".to_string()],
    );
    recording.ready_timeout_secs = 1;

    // The "bad" locator never opens; the good one records regardless
    struct SplitFactory;
    impl FrameSourceFactory for SplitFactory {
        fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
            if locator.contains("bad") {
                Err(CaptureError::SourceOpen {
                    locator: locator.to_string(),
                    details: "unreachable".to_string(),
                })
            } else {
                Ok(Box::new(ScriptedSource {
                    width: 16,
                    height: 12,
                    frames_before_error: None,
                    emitted: 0,
                }))
            }
        }
    }

    let mut manager = RecordingSessionManager::new(
        &recording,
        &cameras,
        Arc::new(SplitFactory),
        Arc::new(MjpegEncoderFactory::new()),
    );

    manager.start().await.unwrap();
    let sessions = manager.active_sessions().unwrap();
    assert_eq!(sessions[0].state(), CaptureState::Running);
    assert_ne!(sessions[1].state(), CaptureState::Running);

    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.stop().await;

    // The healthy camera still produced its file
    let file = dir.path().join("recordings/0/0.mjpeg");
    assert!(file.exists());
    assert!(file.metadata().unwrap().len() > 0);
}
