use crate::capture::source::{FrameEncoder, FrameEncoderFactory, FrameSource, FrameSourceFactory};
use crate::frame::FrameData;
use arc_swap::ArcSwapOption;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bounded join wait when stopping the capture worker
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Slice length for cancellable sleeps inside the blocking worker
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Lifecycle states of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Trying to open the frame source for the first time
    Opening,
    /// Pulling, resizing and forwarding frames
    Running,
    /// A frame read failed; the source handle has been released
    Lost,
    /// Re-opening the source after losing it
    Reconnecting,
    /// Stopped by request
    Stopped,
    /// Open attempts exhausted; the worker has exited
    Failed,
}

impl CaptureState {
    /// Whether the worker has terminated
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureState::Stopped | CaptureState::Failed)
    }
}

/// Immutable identity and targets of one capture session
#[derive(Debug, Clone)]
pub struct CaptureDescriptor {
    /// Integer id, assigned by registration order
    pub id: usize,
    /// Opaque source locator (RTSP URL, device path, ...)
    pub locator: String,
    /// Target frame rate for the output
    pub target_fps: u32,
    /// Frames are resized to this (width, height)
    pub target_resolution: (u32, u32),
    /// Output file, or None for live-preview mode (no encoder)
    pub output_path: Option<PathBuf>,
}

/// Bounded reconnect policy: fixed delay between open attempts, fixed
/// attempt budget that only successful frames replenish.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// One camera capture session.
///
/// Owns a blocking worker that pulls frames from its source, resizes them
/// to the target resolution, forwards them to the encoder (when one is
/// attached) and publishes each frame with a single atomic pointer swap.
/// A failed frame read releases the source and re-enters a bounded
/// reconnect loop in place; exhausting the attempt budget is terminal.
pub struct CaptureSession {
    descriptor: CaptureDescriptor,
    state_rx: watch::Receiver<CaptureState>,
    latest: Arc<ArcSwapOption<FrameData>>,
    cancellation_token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Construct the session and launch its worker immediately.
    pub fn start(
        descriptor: CaptureDescriptor,
        policy: RetryPolicy,
        source_factory: Arc<dyn FrameSourceFactory>,
        encoder_factory: Option<Arc<dyn FrameEncoderFactory>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(CaptureState::Opening);
        let latest = Arc::new(ArcSwapOption::empty());
        let cancellation_token = CancellationToken::new();

        let worker_descriptor = descriptor.clone();
        let worker_latest = Arc::clone(&latest);
        let worker_cancel = cancellation_token.clone();

        let worker = tokio::task::spawn_blocking(move || {
            capture_worker(
                worker_descriptor,
                policy,
                source_factory,
                encoder_factory,
                worker_latest,
                state_tx,
                worker_cancel,
            );
        });

        Self {
            descriptor,
            state_rx,
            latest,
            cancellation_token,
            worker: Some(worker),
        }
    }

    pub fn descriptor(&self) -> &CaptureDescriptor {
        &self.descriptor
    }

    /// Current lifecycle state
    pub fn state(&self) -> CaptureState {
        *self.state_rx.borrow()
    }

    /// Most recently captured frame, if any. Never blocks; callers render
    /// a placeholder while this is None or the session is not running.
    pub fn latest_frame(&self) -> Option<Arc<FrameData>> {
        self.latest.load_full()
    }

    /// Wait until the session reaches Running, or a terminal state, or the
    /// timeout expires. Returns whether it is Running.
    pub async fn wait_until_running(&self, wait: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        timeout(wait, async move {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    CaptureState::Running => return true,
                    s if s.is_terminal() => return false,
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Signal the worker to exit and join it with a bounded timeout.
    /// Handles are released by the worker itself; repeated stops are no-ops.
    pub async fn stop(&mut self) {
        self.cancellation_token.cancel();

        if let Some(worker) = self.worker.take() {
            match timeout(JOIN_TIMEOUT, worker).await {
                Ok(Ok(())) => debug!("Capture session {} worker joined", self.descriptor.id),
                Ok(Err(e)) => error!(
                    "Capture session {} worker panicked: {}",
                    self.descriptor.id, e
                ),
                Err(_) => warn!(
                    "Capture session {} worker did not exit within {:?}; abandoning it",
                    self.descriptor.id, JOIN_TIMEOUT
                ),
            }
        }
    }
}

/// Sleep in short slices so cancellation cuts the wait. Returns true when
/// cancelled.
fn cancellable_sleep(cancel: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return cancel.is_cancelled();
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Open the source with the bounded retry loop. `phase` is Opening on the
/// first connect and Reconnecting afterwards. `attempts` is the worker's
/// running counter; only a successful frame read resets it, so a source
/// that opens but never delivers eventually exhausts the budget too.
/// Returns None once cancelled or the budget is spent (state already
/// published).
fn open_with_retry(
    descriptor: &CaptureDescriptor,
    policy: RetryPolicy,
    phase: CaptureState,
    attempts: &mut u32,
    source_factory: &Arc<dyn FrameSourceFactory>,
    state_tx: &watch::Sender<CaptureState>,
    cancel: &CancellationToken,
) -> Option<Box<dyn FrameSource>> {
    let _ = state_tx.send(phase);

    loop {
        if cancel.is_cancelled() {
            let _ = state_tx.send(CaptureState::Stopped);
            return None;
        }

        if *attempts >= policy.attempts {
            error!(
                "Capture session {} gave up on {} after {} attempts",
                descriptor.id, descriptor.locator, policy.attempts
            );
            let _ = state_tx.send(CaptureState::Failed);
            return None;
        }
        *attempts += 1;

        match source_factory.open(&descriptor.locator) {
            Ok(source) => {
                if *attempts > 1 {
                    info!(
                        "Capture session {} opened {} on attempt {}",
                        descriptor.id, descriptor.locator, *attempts
                    );
                }
                return Some(source);
            }
            Err(e) => {
                warn!(
                    "Capture session {} failed to open {} (attempt {}/{}): {}",
                    descriptor.id, descriptor.locator, *attempts, policy.attempts, e
                );
                if *attempts < policy.attempts && cancellable_sleep(cancel, policy.delay) {
                    let _ = state_tx.send(CaptureState::Stopped);
                    return None;
                }
            }
        }
    }
}

fn capture_worker(
    descriptor: CaptureDescriptor,
    policy: RetryPolicy,
    source_factory: Arc<dyn FrameSourceFactory>,
    encoder_factory: Option<Arc<dyn FrameEncoderFactory>>,
    latest: Arc<ArcSwapOption<FrameData>>,
    state_tx: watch::Sender<CaptureState>,
    cancel: CancellationToken,
) {
    let (width, height) = descriptor.target_resolution;
    let mut encoder: Option<Box<dyn FrameEncoder>> = None;
    let mut phase = CaptureState::Opening;
    let mut attempts: u32 = 0;

    'connect: loop {
        let Some(mut source) = open_with_retry(
            &descriptor,
            policy,
            phase,
            &mut attempts,
            &source_factory,
            &state_tx,
            &cancel,
        ) else {
            break 'connect;
        };

        // The encoder outlives reconnects: one output file per session
        if encoder.is_none() {
            if let (Some(factory), Some(path)) = (&encoder_factory, &descriptor.output_path) {
                match factory.create(path, descriptor.target_fps, descriptor.target_resolution) {
                    Ok(enc) => encoder = Some(enc),
                    Err(e) => {
                        error!(
                            "Capture session {} could not create encoder: {}",
                            descriptor.id, e
                        );
                        let _ = state_tx.send(CaptureState::Failed);
                        break 'connect;
                    }
                }
            }
        }

        let _ = state_tx.send(CaptureState::Running);
        info!(
            "Capture session {} running ({})",
            descriptor.id, descriptor.locator
        );

        loop {
            if cancel.is_cancelled() {
                let _ = state_tx.send(CaptureState::Stopped);
                break 'connect;
            }

            match source.read_frame() {
                Ok(frame) => {
                    attempts = 0;
                    let frame = frame.resize_to(width, height);

                    if let Some(enc) = encoder.as_mut() {
                        if let Err(e) = enc.write_frame(&frame) {
                            warn!(
                                "Capture session {} dropped a frame at the encoder: {}",
                                descriptor.id, e
                            );
                        }
                    }

                    latest.store(Some(Arc::new(frame)));
                }
                Err(e) => {
                    warn!(
                        "Capture session {} lost its source: {}",
                        descriptor.id, e
                    );
                    let _ = state_tx.send(CaptureState::Lost);
                    drop(source);
                    phase = CaptureState::Reconnecting;
                    continue 'connect;
                }
            }
        }
    }

    if let Some(mut enc) = encoder {
        enc.release();
    }
    debug!("Capture session {} worker exited", descriptor.id);
}
