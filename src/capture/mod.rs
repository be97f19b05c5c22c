#[cfg(all(target_os = "linux", feature = "camera"))]
mod gst;
mod manager;
mod session;
mod source;
#[cfg(test)]
mod tests;

pub use manager::RecordingSessionManager;
pub use session::{CaptureDescriptor, CaptureSession, CaptureState, RetryPolicy};
pub use source::{
    FrameEncoder, FrameEncoderFactory, FrameSource, FrameSourceFactory, MjpegEncoderFactory,
    MjpegFileEncoder, PatternFrameSource, PatternSourceFactory,
};

#[cfg(all(target_os = "linux", feature = "camera"))]
pub use gst::{GstEncoderFactory, GstSourceFactory};
