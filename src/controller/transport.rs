use crate::error::ControllerError;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Fixed report size read from the device per poll
pub const REPORT_LEN: usize = 64;

/// Number of leading report bytes this system consumes.
///
/// Byte layout: byte0 = left stick X, byte1 = left stick Y,
/// byte2 = right stick X, byte3 = right stick Y, byte4 = button bitmap
/// (high nibble = four logical buttons).
pub const REPORT_BYTES_USED: usize = 5;

/// Raw HID report transport.
///
/// Implementations deliver fixed-size input reports with a bounded blocking
/// read, and support a non-blocking drain used to discard reports buffered
/// while nobody was polling.
pub trait DeviceTransport: Send {
    /// Read one report into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read, or `Ok(0)` when no report arrived
    /// within the timeout.
    fn read_report(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ControllerError>;

    /// Discard any buffered reports without blocking. Returns how many
    /// reports were dropped.
    fn drain(&mut self) -> Result<usize, ControllerError>;

    /// Release the underlying device handle. Must be a no-op when called
    /// more than once.
    fn close(&mut self) {}
}

/// Hidraw-backed transport for Linux
#[cfg(target_os = "linux")]
pub struct HidrawTransport {
    file: Option<std::fs::File>,
    path: String,
}

#[cfg(target_os = "linux")]
impl HidrawTransport {
    /// Open a hidraw device node (e.g., /dev/hidraw0)
    pub fn open(path: &str) -> Result<Self, ControllerError> {
        let file = std::fs::File::open(path).map_err(|e| ControllerError::DeviceOpen {
            device: path.to_string(),
            details: e.to_string(),
        })?;

        debug!("Opened hidraw device: {}", path);

        Ok(Self {
            file: Some(file),
            path: path.to_string(),
        })
    }

    fn poll_readable(&self, timeout_ms: i32) -> Result<bool, ControllerError> {
        use std::os::unix::io::AsRawFd;

        let file = self.file.as_ref().ok_or(ControllerError::Disconnected)?;
        let mut pollfd = libc::pollfd {
            fd: file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc < 0 {
            return Err(ControllerError::DeviceRead {
                details: std::io::Error::last_os_error().to_string(),
            });
        }
        if rc == 0 {
            return Ok(false);
        }
        if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(ControllerError::Disconnected);
        }

        Ok(pollfd.revents & libc::POLLIN != 0)
    }
}

#[cfg(target_os = "linux")]
impl DeviceTransport for HidrawTransport {
    fn read_report(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ControllerError> {
        use std::io::Read;

        if !self.poll_readable(timeout.as_millis().min(i32::MAX as u128) as i32)? {
            return Ok(0);
        }

        let file = self.file.as_mut().ok_or(ControllerError::Disconnected)?;
        match file.read(buf) {
            Ok(0) => Err(ControllerError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) => Err(ControllerError::DeviceRead {
                details: e.to_string(),
            }),
        }
    }

    fn drain(&mut self) -> Result<usize, ControllerError> {
        use std::io::Read;

        let mut dropped = 0;
        let mut buf = [0u8; REPORT_LEN];

        // Zero-timeout poll keeps the drain non-blocking
        while self.poll_readable(0)? {
            let file = self.file.as_mut().ok_or(ControllerError::Disconnected)?;
            match file.read(&mut buf) {
                Ok(0) => return Err(ControllerError::Disconnected),
                Ok(_) => dropped += 1,
                Err(e) => {
                    return Err(ControllerError::DeviceRead {
                        details: e.to_string(),
                    })
                }
            }
        }

        if dropped > 0 {
            debug!("Drained {} stale reports from {}", dropped, self.path);
        }

        Ok(dropped)
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed hidraw device: {}", self.path);
        }
    }
}

/// One step of a scripted mock transport
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver a report with the given five leading bytes
    Report([u8; REPORT_BYTES_USED]),
    /// Produce no report for the given duration
    Hold(Duration),
    /// Fail a single read with the given message
    Fail(String),
    /// Behave as a disconnected device from this point on
    Disconnect,
}

/// Scripted transport for tests and platforms without a hidraw device.
///
/// Reports are played back in order; once the script is exhausted the
/// transport either repeats the last report (default) or times out every
/// read.
pub struct MockDeviceTransport {
    steps: VecDeque<ScriptStep>,
    buffered: Vec<[u8; REPORT_BYTES_USED]>,
    last_report: Option<[u8; REPORT_BYTES_USED]>,
    repeat_last: bool,
    closed: bool,
}

impl MockDeviceTransport {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: steps.into(),
            buffered: Vec::new(),
            last_report: None,
            repeat_last: true,
            closed: false,
        }
    }

    /// A transport that forever reports centered sticks and no buttons
    pub fn centered() -> Self {
        Self::new(vec![ScriptStep::Report([127, 127, 127, 127, 8])])
    }

    /// Stop repeating the last report once the script is exhausted
    pub fn without_repeat(mut self) -> Self {
        self.repeat_last = false;
        self
    }

    /// Pre-load stale reports that only `drain()` will consume
    pub fn with_buffered(mut self, reports: Vec<[u8; REPORT_BYTES_USED]>) -> Self {
        self.buffered = reports;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn deliver(buf: &mut [u8], report: [u8; REPORT_BYTES_USED]) -> usize {
        let n = REPORT_LEN.min(buf.len());
        buf[..n].fill(0);
        let used = REPORT_BYTES_USED.min(n);
        buf[..used].copy_from_slice(&report[..used]);
        n
    }
}

impl DeviceTransport for MockDeviceTransport {
    fn read_report(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ControllerError> {
        match self.steps.front().cloned() {
            Some(ScriptStep::Report(report)) => {
                self.steps.pop_front();
                self.last_report = Some(report);
                Ok(Self::deliver(buf, report))
            }
            Some(ScriptStep::Hold(d)) => {
                self.steps.pop_front();
                std::thread::sleep(d);
                Ok(0)
            }
            Some(ScriptStep::Fail(details)) => {
                self.steps.pop_front();
                Err(ControllerError::DeviceRead { details })
            }
            Some(ScriptStep::Disconnect) => Err(ControllerError::Disconnected),
            None => {
                if self.repeat_last {
                    if let Some(report) = self.last_report {
                        // Pace playback so the poll loop does not spin
                        std::thread::sleep(Duration::from_millis(1));
                        return Ok(Self::deliver(buf, report));
                    }
                }
                std::thread::sleep(timeout);
                Ok(0)
            }
        }
    }

    fn drain(&mut self) -> Result<usize, ControllerError> {
        let dropped = self.buffered.len();
        self.buffered.clear();
        Ok(dropped)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("Mock transport closed");
        }
    }
}
