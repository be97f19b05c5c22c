use crate::capture::session::{CaptureDescriptor, CaptureSession, RetryPolicy};
use crate::capture::source::{FrameEncoderFactory, FrameSourceFactory};
use crate::config::{CamerasConfig, RecordingConfig};
use crate::error::{CaptureError, Result, TelearmError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Manages the cohort of capture sessions for one recording at a time.
///
/// Sessions of a recording share an output directory named by a
/// monotonically increasing session id; the id survives process restarts
/// because it is re-derived by counting existing directories.
pub struct RecordingSessionManager {
    root_dir: PathBuf,
    sources: Vec<String>,
    target_fps: u32,
    target_resolution: (u32, u32),
    ready_timeout: Duration,
    policy: RetryPolicy,
    session_id: u64,
    active: Option<Vec<CaptureSession>>,
    source_factory: Arc<dyn FrameSourceFactory>,
    encoder_factory: Arc<dyn FrameEncoderFactory>,
}

impl RecordingSessionManager {
    pub fn new(
        recording: &RecordingConfig,
        cameras: &CamerasConfig,
        source_factory: Arc<dyn FrameSourceFactory>,
        encoder_factory: Arc<dyn FrameEncoderFactory>,
    ) -> Self {
        let root_dir = PathBuf::from(&recording.root_dir);
        let session_id = initial_session_id(&root_dir);

        let mut manager = Self {
            root_dir,
            sources: Vec::new(),
            target_fps: cameras.target_fps,
            target_resolution: cameras.target_resolution,
            ready_timeout: recording.ready_timeout(),
            policy: RetryPolicy {
                attempts: recording.reconnect_attempts,
                delay: recording.reconnect_delay(),
            },
            session_id,
            active: None,
            source_factory,
            encoder_factory,
        };

        for source in &cameras.sources {
            manager.register(source.clone());
        }

        info!(
            "Recording session manager ready (root {}, next session {})",
            manager.root_dir.display(),
            manager.session_id
        );

        manager
    }

    fn register(&mut self, locator: String) -> usize {
        let id = self.sources.len();
        debug!("Registered camera {}: {}", id, locator);
        self.sources.push(locator);
        id
    }

    /// Register a frame source; returns its id (assignment by insertion
    /// order, stable within this process run).
    pub fn add_source<S: Into<String>>(&mut self, locator: S) -> usize {
        self.register(locator.into())
    }

    /// Id the next recording session will use
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// The capture sessions of the active recording, if one is running
    pub fn active_sessions(&self) -> Option<&[CaptureSession]> {
        self.active.as_deref()
    }

    /// Start a recording session: create the session directory, launch one
    /// capture session per registered source, and wait (bounded, per
    /// session) for each to reach Running. A session that misses the
    /// deadline is logged and skipped; it does not abort its siblings.
    ///
    /// A no-op with a warning when no sources are registered. Starting
    /// while a session is active is rejected.
    pub async fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(TelearmError::Capture(CaptureError::SessionActive));
        }

        if self.sources.is_empty() {
            warn!("No cameras registered; nothing to record");
            return Ok(());
        }

        let session_dir = self.root_dir.join(self.session_id.to_string());
        std::fs::create_dir_all(&session_dir).map_err(|e| {
            TelearmError::Capture(CaptureError::DirectoryCreation {
                path: session_dir.display().to_string(),
                source: e,
            })
        })?;

        let extension = self.encoder_factory.file_extension();
        let mut sessions = Vec::with_capacity(self.sources.len());

        for (id, locator) in self.sources.iter().enumerate() {
            let descriptor = CaptureDescriptor {
                id,
                locator: locator.clone(),
                target_fps: self.target_fps,
                target_resolution: self.target_resolution,
                output_path: Some(session_dir.join(format!("{}.{}", id, extension))),
            };

            let session = CaptureSession::start(
                descriptor,
                self.policy,
                Arc::clone(&self.source_factory),
                Some(Arc::clone(&self.encoder_factory)),
            );
            debug!("Camera {} capture session started", id);
            sessions.push(session);
        }

        for session in &sessions {
            if !session.wait_until_running(self.ready_timeout).await {
                warn!(
                    "Camera {} failed to start recording in time. Skipping.",
                    session.descriptor().id
                );
            }
        }

        info!("Recording session {} started", self.session_id);
        self.active = Some(sessions);

        Ok(())
    }

    /// Stop the active recording session: cancel and join every capture
    /// session (bounded), then advance the session id. A warning no-op
    /// when nothing is recording.
    pub async fn stop(&mut self) {
        let Some(mut sessions) = self.active.take() else {
            warn!("No recording session active; nothing to stop");
            return;
        };

        for session in &mut sessions {
            session.stop().await;
            debug!("Camera {} capture session stopped", session.descriptor().id);
        }

        info!("Recording session {} finished", self.session_id);
        self.session_id += 1;
    }
}

/// Derive the next session id by counting existing session directories
fn initial_session_id(root: &Path) -> u64 {
    if !root.exists() {
        return 0;
    }

    match std::fs::read_dir(root) {
        Ok(entries) => entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .count() as u64,
        Err(e) => {
            warn!(
                "Could not scan {} for existing sessions: {}; starting at 0",
                root.display(),
                e
            );
            0
        }
    }
}
