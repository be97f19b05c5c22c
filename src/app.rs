use crate::capture::{FrameEncoderFactory, FrameSourceFactory, RecordingSessionManager};
use crate::config::TelearmConfig;
use crate::controller::ControllerReader;
use crate::error::Result;
use crate::robot::{MotionInterface, SimulatedMotion};
use crate::telemetry::TelemetryLogger;
use crate::teleop::TeleopLoop;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Top-level application: wires configuration into components, runs the
/// teleoperation loop until interrupted, then shuts everything down in
/// order.
pub struct TelearmApp {
    config: TelearmConfig,
}

impl TelearmApp {
    pub fn new(config: TelearmConfig) -> Self {
        Self { config }
    }

    /// Build all components without running the loop. Fatal configuration
    /// and store-layout problems surface here.
    pub fn build(&self) -> Result<TeleopLoop> {
        let (source_factory, encoder_factory) = capture_factories(&self.config);

        let recorder = RecordingSessionManager::new(
            &self.config.recording,
            &self.config.cameras,
            source_factory,
            encoder_factory,
        );

        let logger = TelemetryLogger::open(&self.config.telemetry)?;

        let transport = open_transport(&self.config.controller)?;
        let controller = ControllerReader::new(transport, &self.config.controller);

        info!(
            "Robot backend: simulated (configured address {})",
            self.config.robot.address
        );
        let robot: Box<dyn MotionInterface> = Box::new(SimulatedMotion::new());

        Ok(TeleopLoop::new(
            &self.config,
            controller,
            robot,
            recorder,
            logger,
        ))
    }

    /// Run the system until ctrl-c. Returns the process exit code.
    pub async fn run(self) -> Result<i32> {
        let mut teleop = self.build()?;
        teleop.start_controller()?;

        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                signal_cancel.cancel();
            }
        });

        let result = teleop.run(&cancel).await;
        teleop.shutdown().await;

        result.map(|()| 0)
    }
}

/// Pick the capture backends: GStreamer when compiled in, the synthetic
/// pattern source and MJPEG file encoder otherwise.
fn capture_factories(
    config: &TelearmConfig,
) -> (Arc<dyn FrameSourceFactory>, Arc<dyn FrameEncoderFactory>) {
    #[cfg(all(target_os = "linux", feature = "camera"))]
    {
        let _ = config;
        (
            Arc::new(crate::capture::GstSourceFactory),
            Arc::new(crate::capture::GstEncoderFactory),
        )
    }

    #[cfg(not(all(target_os = "linux", feature = "camera")))]
    {
        warn!("GStreamer backend not compiled in; using synthetic frame sources");
        let (width, height) = config.cameras.target_resolution;
        (
            Arc::new(crate::capture::PatternSourceFactory::new(
                width,
                height,
                config.cameras.target_fps,
            )),
            Arc::new(crate::capture::MjpegEncoderFactory::new()),
        )
    }
}

/// Open the controller device transport for this platform. The literal
/// device name "mock" selects the scripted transport for bench runs.
fn open_transport(
    config: &crate::config::ControllerConfig,
) -> Result<Box<dyn crate::controller::DeviceTransport>> {
    if config.device == "mock" {
        warn!("Using mock controller transport (device = \"mock\")");
        return Ok(Box::new(
            crate::controller::MockDeviceTransport::centered(),
        ));
    }

    #[cfg(target_os = "linux")]
    {
        let transport = crate::controller::HidrawTransport::open(&config.device)
            .map_err(crate::error::TelearmError::Controller)?;
        Ok(Box::new(transport))
    }

    #[cfg(not(target_os = "linux"))]
    {
        warn!(
            "Hidraw transport is only available on Linux; using mock transport instead of {}",
            config.device
        );
        Ok(Box::new(
            crate::controller::MockDeviceTransport::centered(),
        ))
    }
}
