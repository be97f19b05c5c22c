pub mod app;
pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod robot;
pub mod telemetry;
pub mod teleop;

pub use app::TelearmApp;
pub use capture::{
    CaptureDescriptor, CaptureSession, CaptureState, FrameEncoder, FrameEncoderFactory,
    FrameSource, FrameSourceFactory, RecordingSessionManager, RetryPolicy,
};
pub use config::TelearmConfig;
pub use controller::{ControllerReader, ControllerSnapshot, DeviceTransport};
pub use error::{CaptureError, ControllerError, RobotError, TelearmError, TelemetryError, Result};
pub use frame::{FrameData, FrameFormat};
pub use robot::{MotionInterface, SimulatedMotion, Vector6};
pub use telemetry::{ArraySpec, ArrayStore, ElementType, TelemetryLogger, TelemetryRecord};
pub use teleop::{EdgeLatch, TeleopLoop};
