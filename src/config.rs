use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelearmConfig {
    pub robot: RobotConfig,
    pub controller: ControllerConfig,
    pub cameras: CamerasConfig,
    pub recording: RecordingConfig,
    pub telemetry: TelemetryConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RobotConfig {
    /// Robot controller address (IP or hostname)
    #[serde(default = "default_robot_address")]
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControllerConfig {
    /// HID device path (e.g., /dev/hidraw0)
    #[serde(default = "default_controller_device")]
    pub device: String,

    /// Deadzone radius applied to mapped stick positions
    #[serde(default = "default_deadzone")]
    pub deadzone: f32,

    /// Snapshot age beyond which the controller is considered stale (ms)
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CamerasConfig {
    /// Frame source locators, one capture session each (e.g., RTSP URLs)
    #[serde(default)]
    pub sources: Vec<String>,

    /// Target frames per second for recording
    #[serde(default = "default_camera_fps")]
    pub target_fps: u32,

    /// Target resolution (width, height); frames are resized to this
    #[serde(default = "default_camera_resolution")]
    pub target_resolution: (u32, u32),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Root directory for per-session recording folders
    #[serde(default = "default_recording_root")]
    pub root_dir: String,

    /// Seconds to wait for each capture session to reach Running
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Delay between source open attempts (seconds)
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Bounded number of source open attempts before a session fails
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelemetryConfig {
    /// Path of the on-disk array store
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Recreate the store instead of extending an existing one
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,

    /// Rows per storage chunk
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControlConfig {
    /// Control loop period in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Initial speed in meters per second at full stick deflection
    #[serde(default = "default_velocity_multiplier")]
    pub velocity_multiplier: f64,

    /// Velocity multiplier change per tick while a speed button is held
    #[serde(default = "default_velocity_step")]
    pub velocity_step: f64,

    /// Maximum duration a single velocity command stays in effect (seconds)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: f64,
}

impl ControllerConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

impl RecordingConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl ControlConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout_secs)
    }
}

impl TelearmConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("telearm.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("robot.address", default_robot_address())?
            .set_default("controller.device", default_controller_device())?
            .set_default("controller.deadzone", default_deadzone() as f64)?
            .set_default(
                "controller.stale_timeout_ms",
                default_stale_timeout_ms() as i64,
            )?
            .set_default("cameras.sources", Vec::<String>::new())?
            .set_default("cameras.target_fps", default_camera_fps())?
            .set_default(
                "cameras.target_resolution",
                vec![
                    default_camera_resolution().0,
                    default_camera_resolution().1,
                ],
            )?
            .set_default("recording.root_dir", default_recording_root())?
            .set_default(
                "recording.ready_timeout_secs",
                default_ready_timeout_secs() as i64,
            )?
            .set_default(
                "recording.reconnect_delay_secs",
                default_reconnect_delay_secs() as i64,
            )?
            .set_default(
                "recording.reconnect_attempts",
                default_reconnect_attempts() as i64,
            )?
            .set_default("telemetry.store_path", default_store_path())?
            .set_default("telemetry.overwrite", default_overwrite())?
            .set_default("telemetry.chunk_rows", default_chunk_rows() as i64)?
            .set_default("control.period_ms", default_period_ms() as i64)?
            .set_default(
                "control.velocity_multiplier",
                default_velocity_multiplier(),
            )?
            .set_default("control.velocity_step", default_velocity_step())?
            .set_default(
                "control.command_timeout_secs",
                default_command_timeout_secs(),
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with TELEARM_ prefix
            .add_source(Environment::with_prefix("TELEARM").separator("_"))
            .build()?;

        let config: TelearmConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.robot.address.is_empty() {
            return Err(ConfigError::Message(
                "Robot address must not be empty".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.controller.deadzone) {
            return Err(ConfigError::Message(
                "Controller deadzone must be in [0, 1)".to_string(),
            ));
        }

        if self.cameras.target_fps == 0 {
            return Err(ConfigError::Message(
                "Camera target_fps must be greater than 0".to_string(),
            ));
        }

        if self.cameras.target_resolution.0 == 0 || self.cameras.target_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera target_resolution must be greater than 0".to_string(),
            ));
        }

        if self.recording.reconnect_attempts == 0 {
            return Err(ConfigError::Message(
                "Recording reconnect_attempts must be greater than 0".to_string(),
            ));
        }

        if self.telemetry.chunk_rows == 0 {
            return Err(ConfigError::Message(
                "Telemetry chunk_rows must be greater than 0".to_string(),
            ));
        }

        if self.control.period_ms == 0 {
            return Err(ConfigError::Message(
                "Control period_ms must be greater than 0".to_string(),
            ));
        }

        if self.control.command_timeout_secs <= 0.0 {
            return Err(ConfigError::Message(
                "Control command_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for TelearmConfig {
    fn default() -> Self {
        Self {
            robot: RobotConfig {
                address: default_robot_address(),
            },
            controller: ControllerConfig {
                device: default_controller_device(),
                deadzone: default_deadzone(),
                stale_timeout_ms: default_stale_timeout_ms(),
            },
            cameras: CamerasConfig {
                sources: Vec::new(),
                target_fps: default_camera_fps(),
                target_resolution: default_camera_resolution(),
            },
            recording: RecordingConfig {
                root_dir: default_recording_root(),
                ready_timeout_secs: default_ready_timeout_secs(),
                reconnect_delay_secs: default_reconnect_delay_secs(),
                reconnect_attempts: default_reconnect_attempts(),
            },
            telemetry: TelemetryConfig {
                store_path: default_store_path(),
                overwrite: default_overwrite(),
                chunk_rows: default_chunk_rows(),
            },
            control: ControlConfig {
                period_ms: default_period_ms(),
                velocity_multiplier: default_velocity_multiplier(),
                velocity_step: default_velocity_step(),
                command_timeout_secs: default_command_timeout_secs(),
            },
        }
    }
}

// Default value functions
fn default_robot_address() -> String {
    "192.168.86.5".to_string()
}

fn default_controller_device() -> String {
    "/dev/hidraw0".to_string()
}
fn default_deadzone() -> f32 {
    0.05
}
fn default_stale_timeout_ms() -> u64 {
    500
}

fn default_camera_fps() -> u32 {
    30
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}

fn default_recording_root() -> String {
    "recordings".to_string()
}
fn default_ready_timeout_secs() -> u64 {
    5
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_reconnect_attempts() -> u32 {
    5
}

fn default_store_path() -> String {
    "replay_buffer.store".to_string()
}
fn default_overwrite() -> bool {
    false
}
fn default_chunk_rows() -> usize {
    100
}

fn default_period_ms() -> u64 {
    50
}
fn default_velocity_multiplier() -> f64 {
    0.1
}
fn default_velocity_step() -> f64 {
    0.0005
}
fn default_command_timeout_secs() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = TelearmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.control.period(), Duration::from_millis(50));
        assert_eq!(config.recording.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_validation_rejects_bad_values() {
        let mut config = TelearmConfig::default();
        config.cameras.target_resolution = (0, 0);
        assert!(config.validate().is_err());

        config.cameras.target_resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.controller.deadzone = 1.5;
        assert!(config.validate().is_err());
        config.controller.deadzone = 0.05;

        config.control.command_timeout_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = TelearmConfig::load_from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.control.period_ms, 50);
        assert_eq!(config.telemetry.chunk_rows, 100);
        assert!(config.cameras.sources.is_empty());
    }
}
