use crate::capture::RecordingSessionManager;
use crate::config::TelearmConfig;
use crate::controller::{ControllerReader, ControllerSnapshot};
use crate::error::Result;
use crate::robot::{MotionInterface, Vector6};
use crate::telemetry::{TelemetryLogger, TelemetryRecord};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Logical button assignments within the report's high nibble
pub const BTN_STAGE: usize = 0;
pub const BTN_VEL_UP: usize = 1;
pub const BTN_VEL_DOWN: usize = 2;
pub const BTN_EPISODE: usize = 3;

/// Stage cycles through [0, STAGE_COUNT)
pub const STAGE_COUNT: u8 = 4;

/// Ticks between operator status lines
const STATUS_EVERY: u64 = 20;

/// Per-button latch for edge-triggered actions.
///
/// Fires exactly once per physical press: set on the 0→1 transition and
/// re-armed only after the button is observed released.
#[derive(Debug, Default)]
pub struct EdgeLatch {
    latched: bool,
}

impl EdgeLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-arm the latch; call whenever the button level is 0
    pub fn release(&mut self) {
        self.latched = false;
    }

    /// Attempt to fire while the button level is 1; true exactly once per
    /// press
    pub fn try_fire(&mut self) -> bool {
        if self.latched {
            false
        } else {
            self.latched = true;
            true
        }
    }

    /// Combined level update: true exactly on the 0→1 transition
    pub fn rising(&mut self, pressed: bool) -> bool {
        if !pressed {
            self.release();
            false
        } else {
            self.try_fire()
        }
    }
}

/// Fixed-period teleoperation loop.
///
/// Each tick reads one controller snapshot, runs the button state machine,
/// optionally appends telemetry, and issues a single bounded-duration
/// velocity command. Camera capture and controller polling happen on their
/// own workers; nothing here blocks on device I/O.
pub struct TeleopLoop {
    period: Duration,
    command_timeout: Duration,
    stale_timeout: Duration,
    velocity_step: f64,

    controller: ControllerReader,
    robot: Box<dyn MotionInterface>,
    recorder: RecordingSessionManager,
    logger: TelemetryLogger,

    stage: u8,
    velocity_multiplier: f64,
    tick: u64,
    recording: bool,
    stage_latch: EdgeLatch,
    episode_latch: EdgeLatch,
    controller_safe_stop: bool,
}

impl TeleopLoop {
    pub fn new(
        config: &TelearmConfig,
        controller: ControllerReader,
        robot: Box<dyn MotionInterface>,
        recorder: RecordingSessionManager,
        logger: TelemetryLogger,
    ) -> Self {
        Self {
            period: config.control.period(),
            command_timeout: config.control.command_timeout(),
            stale_timeout: config.controller.stale_timeout(),
            velocity_step: config.control.velocity_step,
            controller,
            robot,
            recorder,
            logger,
            stage: 0,
            velocity_multiplier: config.control.velocity_multiplier,
            tick: 0,
            recording: false,
            stage_latch: EdgeLatch::new(),
            episode_latch: EdgeLatch::new(),
            controller_safe_stop: false,
        }
    }

    pub fn stage(&self) -> u8 {
        self.stage
    }

    pub fn velocity_multiplier(&self) -> f64 {
        self.velocity_multiplier
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn logger(&self) -> &TelemetryLogger {
        &self.logger
    }

    pub fn recorder(&self) -> &RecordingSessionManager {
        &self.recorder
    }

    /// Start the controller poll worker (drains stale reports first)
    pub fn start_controller(&mut self) -> Result<()> {
        self.controller.start()
    }

    /// Run until cancelled. One velocity command per tick; overruns are
    /// logged and the next tick starts immediately.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        info!(
            "Teleoperation loop starting (period {:?}, stage 0, velocity {:.4})",
            self.period, self.velocity_multiplier
        );

        while !cancel.is_cancelled() {
            let tick_start = Instant::now();

            let snapshot = self.controller.snapshot();
            self.handle_buttons(snapshot.buttons).await;

            let setpoint = self.velocity_setpoint(&snapshot);

            if self.recording {
                let record = self.build_record(setpoint)?;
                self.logger.append(&record)?;
            }

            self.robot.send_velocity(setpoint, self.command_timeout)?;

            self.tick += 1;
            if self.tick % STATUS_EVERY == 0 {
                debug!(
                    "Stage: {}, Velocity: {:.4}, Tick: {:6}",
                    self.stage, self.velocity_multiplier, self.tick
                );
            }

            let elapsed = tick_start.elapsed();
            if elapsed > self.period {
                warn!(
                    "Control cycle overran its budget: {:?} > {:?}",
                    elapsed, self.period
                );
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.period - elapsed) => {}
                }
            }
        }

        info!("Teleoperation loop exited after {} ticks", self.tick);
        Ok(())
    }

    /// Button state machine for one tick.
    ///
    /// Latch re-arming is unconditional; actions run in priority order:
    /// stage-advance (edge) over velocity trim (level, per held tick) over
    /// episode-toggle (edge).
    pub(crate) async fn handle_buttons(&mut self, buttons: [bool; 4]) {
        if !buttons[BTN_STAGE] {
            self.stage_latch.release();
        }
        if !buttons[BTN_EPISODE] {
            self.episode_latch.release();
        }

        if buttons[BTN_STAGE] {
            if self.stage_latch.try_fire() {
                self.stage = (self.stage + 1) % STAGE_COUNT;
                debug!("Stage advanced to {}", self.stage);
            }
        } else if buttons[BTN_VEL_UP] {
            self.velocity_multiplier += self.velocity_step;
        } else if buttons[BTN_VEL_DOWN] {
            self.velocity_multiplier -= self.velocity_step;
        } else if buttons[BTN_EPISODE] && self.episode_latch.try_fire() {
            self.toggle_episode().await;
        }
    }

    async fn toggle_episode(&mut self) {
        self.stage = 0;
        self.tick = 0;

        if let Err(e) = self.logger.end_episode() {
            error!("Failed to record episode boundary: {}", e);
        }

        if self.recording {
            self.recorder.stop().await;
            self.recording = false;
            info!("Episode ended; recording stopped");
        } else {
            match self.recorder.start().await {
                Ok(()) => {
                    self.recording = true;
                    info!("Episode started; recording");
                }
                Err(e) => {
                    warn!("Could not start recording session: {}", e);
                }
            }
        }
    }

    /// Planar setpoint from the left stick, sign-flipped per axis for the
    /// operator's frame. A faulted or stale controller commands zero
    /// velocity instead of the last stick value.
    fn velocity_setpoint(&mut self, snapshot: &ControllerSnapshot) -> Vector6 {
        let safe_stop =
            self.controller.is_faulted() || snapshot.is_stale(self.stale_timeout);

        if safe_stop != self.controller_safe_stop {
            self.controller_safe_stop = safe_stop;
            if safe_stop {
                warn!("Controller input stale or faulted; commanding zero velocity");
            } else {
                info!("Controller input recovered");
            }
        }

        if safe_stop {
            return [0.0; 6];
        }

        let (x, y) = snapshot.left_stick;
        let mut setpoint = [0.0; 6];
        setpoint[0] = -(x as f64) * self.velocity_multiplier;
        setpoint[1] = -(y as f64) * self.velocity_multiplier;
        setpoint
    }

    fn build_record(&mut self, command: Vector6) -> Result<TelemetryRecord> {
        Ok(TelemetryRecord::new()
            .vector("action", self.robot.target_pose()?)
            .vector("robot_eef_pose", self.robot.actual_pose()?)
            .vector("robot_eef_pose_vel", self.robot.actual_velocity()?)
            .vector("robot_joint", self.robot.actual_joints()?)
            .vector("robot_joint_vel", self.robot.actual_joint_velocity()?)
            .vector("robot_vel_cmd", command)
            .scalar("stage", self.stage as f64)
            .scalar("timestamp", chrono::Utc::now().timestamp_millis() as f64))
    }

    /// Orderly shutdown: halt the robot, release its connection, stop the
    /// controller reader, and close any active recording session.
    pub async fn shutdown(mut self) {
        info!("Shutting down teleoperation");

        if let Err(e) = self.robot.stop() {
            error!("Failed to halt robot: {}", e);
        }
        self.robot.disconnect();

        self.controller.stop().await;

        if self.recorder.is_recording() {
            self.recorder.stop().await;
        }

        info!("Teleoperation shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MjpegEncoderFactory, PatternSourceFactory};
    use crate::config::TelearmConfig;
    use crate::controller::{MockDeviceTransport, ScriptStep};
    use crate::error::RobotError;
    use crate::robot::SimulatedMotion;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Shared handle around the simulator so tests can observe commands
    /// after the loop takes ownership.
    #[derive(Clone)]
    struct SharedMotion(Arc<Mutex<SimulatedMotion>>);

    impl SharedMotion {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(SimulatedMotion::new())))
        }

        fn last_command(&self) -> Option<Vector6> {
            self.0.lock().last_command()
        }

        fn commands_sent(&self) -> u64 {
            self.0.lock().commands_sent()
        }
    }

    impl MotionInterface for SharedMotion {
        fn target_pose(&mut self) -> std::result::Result<Vector6, RobotError> {
            self.0.lock().target_pose()
        }
        fn actual_pose(&mut self) -> std::result::Result<Vector6, RobotError> {
            self.0.lock().actual_pose()
        }
        fn actual_velocity(&mut self) -> std::result::Result<Vector6, RobotError> {
            self.0.lock().actual_velocity()
        }
        fn actual_joints(&mut self) -> std::result::Result<Vector6, RobotError> {
            self.0.lock().actual_joints()
        }
        fn actual_joint_velocity(&mut self) -> std::result::Result<Vector6, RobotError> {
            self.0.lock().actual_joint_velocity()
        }
        fn send_velocity(
            &mut self,
            setpoint: Vector6,
            max_duration: Duration,
        ) -> std::result::Result<(), RobotError> {
            self.0.lock().send_velocity(setpoint, max_duration)
        }
        fn stop(&mut self) -> std::result::Result<(), RobotError> {
            self.0.lock().stop()
        }
        fn disconnect(&mut self) {
            self.0.lock().disconnect()
        }
    }

    fn test_config(dir: &TempDir) -> TelearmConfig {
        let mut config = TelearmConfig::default();
        config.recording.root_dir = dir.path().join("recordings").to_string_lossy().to_string();
        config.telemetry.store_path = dir.path().join("store").to_string_lossy().to_string();
        config.control.period_ms = 5;
        config.control.velocity_step = 0.001;
        config.controller.stale_timeout_ms = 100;
        config
    }

    fn build_loop(
        config: &TelearmConfig,
        transport: MockDeviceTransport,
        motion: SharedMotion,
    ) -> TeleopLoop {
        let controller =
            crate::controller::ControllerReader::new(Box::new(transport), &config.controller);
        let recorder = RecordingSessionManager::new(
            &config.recording,
            &config.cameras,
            Arc::new(PatternSourceFactory::new(16, 12, 60)),
            Arc::new(MjpegEncoderFactory::new()),
        );
        let logger = TelemetryLogger::open(&config.telemetry).unwrap();
        TeleopLoop::new(config, controller, Box::new(motion), recorder, logger)
    }

    #[test]
    fn test_edge_latch_fires_once_per_press() {
        let mut latch = EdgeLatch::new();

        assert!(latch.rising(true));
        // Held: no further fires, no matter how many ticks pass
        for _ in 0..10 {
            assert!(!latch.rising(true));
        }

        // Released, then pressed again: fires once more
        assert!(!latch.rising(false));
        assert!(latch.rising(true));
        assert!(!latch.rising(true));
    }

    #[tokio::test]
    async fn test_stage_advances_once_per_press() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let mut teleop = build_loop(
            &config,
            MockDeviceTransport::centered(),
            SharedMotion::new(),
        );

        let held = [true, false, false, false];
        let released = [false; 4];

        for _ in 0..8 {
            teleop.handle_buttons(held).await;
        }
        assert_eq!(teleop.stage(), 1);

        teleop.handle_buttons(released).await;
        teleop.handle_buttons(held).await;
        assert_eq!(teleop.stage(), 2);

        // Stage wraps inside [0, 4)
        for _ in 0..2 {
            teleop.handle_buttons(released).await;
            teleop.handle_buttons(held).await;
        }
        assert_eq!(teleop.stage(), 0);
    }

    #[tokio::test]
    async fn test_velocity_trim_is_level_triggered() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let mut teleop = build_loop(
            &config,
            MockDeviceTransport::centered(),
            SharedMotion::new(),
        );

        let base = teleop.velocity_multiplier();

        for _ in 0..5 {
            teleop.handle_buttons([false, true, false, false]).await;
        }
        assert!((teleop.velocity_multiplier() - (base + 5.0 * 0.001)).abs() < 1e-9);

        for _ in 0..3 {
            teleop.handle_buttons([false, false, true, false]).await;
        }
        assert!((teleop.velocity_multiplier() - (base + 2.0 * 0.001)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stage_button_takes_priority() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let mut teleop = build_loop(
            &config,
            MockDeviceTransport::centered(),
            SharedMotion::new(),
        );

        let base = teleop.velocity_multiplier();

        // Stage and velocity held together: only the stage action runs
        teleop.handle_buttons([true, true, false, false]).await;
        assert_eq!(teleop.stage(), 1);
        assert_eq!(teleop.velocity_multiplier(), base);
    }

    #[tokio::test]
    async fn test_episode_toggle_marks_boundary_and_resets() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let mut teleop = build_loop(
            &config,
            MockDeviceTransport::centered(),
            SharedMotion::new(),
        );

        // Advance stage so the reset is observable
        teleop.handle_buttons([true, false, false, false]).await;
        teleop.handle_buttons([false; 4]).await;
        assert_eq!(teleop.stage(), 1);

        let toggle = [false, false, false, true];

        // Held across many ticks: a single toggle
        for _ in 0..6 {
            teleop.handle_buttons(toggle).await;
        }
        assert!(teleop.is_recording());
        assert_eq!(teleop.stage(), 0);
        assert_eq!(teleop.logger().episode_ends().unwrap().len(), 1);

        teleop.handle_buttons([false; 4]).await;
        for _ in 0..6 {
            teleop.handle_buttons(toggle).await;
        }
        assert!(!teleop.is_recording());
        assert_eq!(teleop.logger().episode_ends().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_streams_commands_and_telemetry() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let motion = SharedMotion::new();

        // Stick pushed right, then episode toggled on, then held steady
        let transport = MockDeviceTransport::new(vec![
            ScriptStep::Report([255, 127, 127, 127, 8]),
            ScriptStep::Hold(Duration::from_millis(30)),
            ScriptStep::Report([255, 127, 127, 127, 0x88]),
            ScriptStep::Hold(Duration::from_millis(30)),
            ScriptStep::Report([255, 127, 127, 127, 8]),
        ]);

        let mut teleop = build_loop(&config, transport, motion.clone());
        teleop.controller.start().unwrap();

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        teleop.run(&cancel).await.unwrap();

        assert!(motion.commands_sent() > 10);

        // The stick deflection reached the robot with the operator's sign
        // flip: raw 255 on X maps to +1.0, commanded as -multiplier
        let last = motion.last_command().unwrap();
        assert!(last[0] < 0.0);

        // The episode toggle started recording and telemetry flowed
        assert!(teleop.is_recording());
        assert!(teleop.logger().record_count().unwrap() > 0);
        assert_eq!(teleop.logger().episode_ends().unwrap().len(), 1);

        teleop.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_controller_commands_zero_velocity() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let motion = SharedMotion::new();

        // One deflected report, then silence: the snapshot goes stale
        let transport = MockDeviceTransport::new(vec![ScriptStep::Report([
            255, 127, 127, 127, 8,
        ])])
        .without_repeat();

        let mut teleop = build_loop(&config, transport, motion.clone());
        teleop.controller.start().unwrap();

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            stopper.cancel();
        });

        teleop.run(&cancel).await.unwrap();

        // Staleness (100 ms) kicked in long before the end of the run
        assert_eq!(motion.last_command().unwrap(), [0.0; 6]);

        teleop.shutdown().await;
    }
}
