use crate::config::ControllerConfig;
use crate::controller::transport::{DeviceTransport, REPORT_BYTES_USED, REPORT_LEN};
use crate::error::{ControllerError, Result, TelearmError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Neutral raw stick value (device center)
const NEUTRAL_STICK: u8 = 127;
/// Neutral raw button byte (high nibble clear)
const NEUTRAL_BUTTONS: u8 = 8;

/// Bounded wait per poll-loop read so cancellation is observed promptly
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Bounded join wait when stopping the poll worker
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of logical buttons in the report's high nibble
pub const BUTTON_COUNT: usize = 4;

/// Raw device bytes, written by the poll worker under a single lock section
#[derive(Debug, Clone, Copy)]
struct RawControllerState {
    lsx: u8,
    lsy: u8,
    rsx: u8,
    rsy: u8,
    buttons: u8,
    updated_at: Option<Instant>,
}

impl RawControllerState {
    fn neutral() -> Self {
        Self {
            lsx: NEUTRAL_STICK,
            lsy: NEUTRAL_STICK,
            rsx: NEUTRAL_STICK,
            rsy: NEUTRAL_STICK,
            buttons: NEUTRAL_BUTTONS,
            updated_at: None,
        }
    }
}

/// Value-copy view of the controller state at one instant.
///
/// Stick positions are deadzone-filtered and normalized to [-1, 1] with
/// stick-up positive; buttons come from the report's high nibble.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSnapshot {
    pub left_stick: (f32, f32),
    pub right_stick: (f32, f32),
    pub buttons: [bool; BUTTON_COUNT],
    /// Time since the poll worker last published a report, if it ever has
    pub age: Option<Duration>,
}

impl ControllerSnapshot {
    /// Whether the snapshot is too old to trust for motion commands.
    ///
    /// A snapshot that has never been updated counts as stale.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age.map_or(true, |age| age > max_age)
    }
}

/// Controller state reader.
///
/// Owns the device transport and a background poll worker that overwrites
/// the raw analog/button bytes under one short mutex section per report.
/// Consumers only ever see immutable [`ControllerSnapshot`] copies.
pub struct ControllerReader {
    shared: Arc<Mutex<RawControllerState>>,
    faulted: Arc<AtomicBool>,
    deadzone: f32,
    cancellation_token: CancellationToken,
    transport: Option<Box<dyn DeviceTransport>>,
    worker: Option<JoinHandle<()>>,
}

impl ControllerReader {
    pub fn new(transport: Box<dyn DeviceTransport>, config: &ControllerConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(RawControllerState::neutral())),
            faulted: Arc::new(AtomicBool::new(false)),
            deadzone: config.deadzone,
            cancellation_token: CancellationToken::new(),
            transport: Some(transport),
            worker: None,
        }
    }

    /// Override the deadzone radius applied to mapped stick positions
    pub fn set_deadzone(&mut self, deadzone: f32) {
        self.deadzone = deadzone;
    }

    /// Flush stale buffered reports, then launch the polling worker.
    pub fn start(&mut self) -> Result<()> {
        let mut transport = self
            .transport
            .take()
            .ok_or(TelearmError::Controller(ControllerError::AlreadyStarted))?;

        let dropped = transport.drain().map_err(TelearmError::Controller)?;
        if dropped > 0 {
            debug!("Flushed {} stale controller reports before start", dropped);
        }

        let shared = Arc::clone(&self.shared);
        let faulted = Arc::clone(&self.faulted);
        let cancel = self.cancellation_token.clone();

        self.worker = Some(tokio::task::spawn_blocking(move || {
            poll_loop(transport, shared, faulted, cancel);
        }));

        info!("Controller reader started");
        Ok(())
    }

    /// Current controller state as a value copy
    pub fn snapshot(&self) -> ControllerSnapshot {
        let raw = *self.shared.lock();

        let left = apply_deadzone(
            map_axis(raw.lsx),
            -map_axis(raw.lsy),
            self.deadzone,
        );
        let right = apply_deadzone(
            map_axis(raw.rsx),
            -map_axis(raw.rsy),
            self.deadzone,
        );

        ControllerSnapshot {
            left_stick: left,
            right_stick: right,
            buttons: unpack_buttons(raw.buttons),
            age: raw.updated_at.map(|t| t.elapsed()),
        }
    }

    /// Whether the poll worker has terminated on a device error
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Relaxed)
    }

    /// Stop the poll worker, reset state to neutral and release the device.
    ///
    /// Joins the worker with a bounded timeout; the neutral reset happens
    /// after the join so a late report cannot overwrite it. Safe to call
    /// repeatedly.
    pub async fn stop(&mut self) {
        self.cancellation_token.cancel();

        if let Some(worker) = self.worker.take() {
            match timeout(JOIN_TIMEOUT, worker).await {
                Ok(Ok(())) => debug!("Controller poll worker joined"),
                Ok(Err(e)) => error!("Controller poll worker panicked: {}", e),
                Err(_) => warn!(
                    "Controller poll worker did not exit within {:?}; abandoning it",
                    JOIN_TIMEOUT
                ),
            }
        }

        {
            let mut state = self.shared.lock();
            *state = RawControllerState::neutral();
        }

        // Never started: the transport is still ours to release
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }

        info!("Controller reader stopped");
    }
}

fn poll_loop(
    mut transport: Box<dyn DeviceTransport>,
    shared: Arc<Mutex<RawControllerState>>,
    faulted: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; REPORT_LEN];

    while !cancel.is_cancelled() {
        match transport.read_report(&mut buf, READ_TIMEOUT) {
            Ok(0) => continue,
            Ok(n) if n >= REPORT_BYTES_USED => {
                let mut state = shared.lock();
                state.lsx = buf[0];
                state.lsy = buf[1];
                state.rsx = buf[2];
                state.rsy = buf[3];
                state.buttons = buf[4];
                state.updated_at = Some(Instant::now());
            }
            Ok(n) => {
                warn!(
                    "Ignoring short controller report ({} bytes, need {})",
                    n, REPORT_BYTES_USED
                );
            }
            Err(e) => {
                error!("Controller poll loop terminating: {}", e);
                faulted.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    transport.close();
    debug!("Controller poll loop exited");
}

/// Map a raw byte in [0, 255] to [-1, 1] around the device center
pub(crate) fn map_axis(raw: u8) -> f32 {
    ((raw as f32 - 128.0) / 127.0).clamp(-1.0, 1.0)
}

/// Zero both axes when the position lies inside the deadzone radius
pub(crate) fn apply_deadzone(x: f32, y: f32, deadzone: f32) -> (f32, f32) {
    if x * x + y * y < deadzone * deadzone {
        (0.0, 0.0)
    } else {
        (x, y)
    }
}

/// Extract the four logical buttons from the report's high nibble
pub(crate) fn unpack_buttons(byte: u8) -> [bool; BUTTON_COUNT] {
    let nibble = (byte & 0xF0) >> 4;
    [
        nibble & 0b0001 != 0,
        nibble & 0b0010 != 0,
        nibble & 0b0100 != 0,
        nibble & 0b1000 != 0,
    ]
}
