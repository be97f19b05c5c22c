use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelearmError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Robot error: {0}")]
    Robot(#[from] RobotError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl TelearmError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Errors from the controller state reader and its device transport
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Failed to open input device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Device read failed: {details}")]
    DeviceRead { details: String },

    #[error("Input device disconnected")]
    Disconnected,

    #[error("Controller reader already started")]
    AlreadyStarted,
}

/// Errors from capture sessions and the recording session manager
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open frame source {locator}: {details}")]
    SourceOpen { locator: String, details: String },

    #[error("Frame read failed: {details}")]
    FrameRead { details: String },

    #[error("Failed to create encoder for {path}: {details}")]
    EncoderOpen { path: PathBuf, details: String },

    #[error("Frame encode failed: {details}")]
    EncoderWrite { details: String },

    #[error("Source {locator} failed after {attempts} open attempts")]
    RetriesExhausted { locator: String, attempts: u32 },

    #[error("Failed to create recording directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        source: std::io::Error,
    },

    #[error("A recording session is already active")]
    SessionActive,
}

impl CaptureError {
    /// Whether the error is worth another bounded retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CaptureError::SourceOpen { .. }
                | CaptureError::FrameRead { .. }
                | CaptureError::EncoderWrite { .. }
        )
    }
}

/// Errors from the telemetry logger and its backing array store
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to open array store at {path}: {details}")]
    StoreOpen { path: PathBuf, details: String },

    #[error("Array {array} exists with incompatible layout: expected {expected}, found {found}")]
    SchemaMismatch {
        array: String,
        expected: String,
        found: String,
    },

    #[error("Array {array} is corrupt: {details}")]
    Corrupt { array: String, details: String },

    #[error("Unknown array {array}")]
    UnknownArray { array: String },

    #[error("Row for {array} has {got} elements, expected {expected}")]
    RowShape {
        array: String,
        got: usize,
        expected: usize,
    },

    #[error("Array store IO failure for {array}: {source}")]
    Io {
        array: String,
        source: std::io::Error,
    },
}

/// Errors from the motion interface
#[derive(Error, Debug)]
pub enum RobotError {
    #[error("Failed to connect to robot at {address}: {details}")]
    Connect { address: String, details: String },

    #[error("Robot command failed: {details}")]
    Command { details: String },

    #[error("Robot state read failed: {details}")]
    StateRead { details: String },

    #[error("Robot is disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, TelearmError>;
