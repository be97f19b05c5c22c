use crate::error::RobotError;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cartesian pose / velocity vector: [x, y, z, rx, ry, rz]
pub type Vector6 = [f64; 6];

/// Motion interface to the robot controller.
///
/// The core only consumes these operations; kinematics and the wire
/// protocol live behind the implementation.
pub trait MotionInterface: Send {
    /// Pose the controller is currently targeting
    fn target_pose(&mut self) -> Result<Vector6, RobotError>;

    /// Measured tool pose
    fn actual_pose(&mut self) -> Result<Vector6, RobotError>;

    /// Measured tool velocity
    fn actual_velocity(&mut self) -> Result<Vector6, RobotError>;

    /// Measured joint positions
    fn actual_joints(&mut self) -> Result<Vector6, RobotError>;

    /// Measured joint velocities
    fn actual_joint_velocity(&mut self) -> Result<Vector6, RobotError>;

    /// Command a tool velocity that expires after `max_duration` unless
    /// refreshed. The expiry bounds runaway motion if the caller stalls.
    fn send_velocity(
        &mut self,
        setpoint: Vector6,
        max_duration: Duration,
    ) -> Result<(), RobotError>;

    /// Halt motion immediately
    fn stop(&mut self) -> Result<(), RobotError>;

    /// Release the connection. Must be a no-op when called repeatedly.
    fn disconnect(&mut self);
}

/// Joint home position reported by the simulator
const SIM_HOME_JOINTS: Vector6 = [0.0, -1.57, 1.57, -1.57, -1.57, 0.0];

/// Kinematic motion simulator.
///
/// Integrates commanded velocities into a pose and honors the per-command
/// expiry, so the control loop and tests exercise the same command contract
/// a hardware backend would enforce.
pub struct SimulatedMotion {
    pose: Vector6,
    velocity: Vector6,
    command_deadline: Option<Instant>,
    last_update: Instant,
    connected: bool,
    commands_sent: u64,
    last_command: Option<Vector6>,
}

impl SimulatedMotion {
    pub fn new() -> Self {
        info!("Using simulated motion interface (no hardware backend attached)");
        Self {
            pose: [0.0; 6],
            velocity: [0.0; 6],
            command_deadline: None,
            last_update: Instant::now(),
            connected: true,
            commands_sent: 0,
            last_command: None,
        }
    }

    /// Number of velocity commands accepted so far
    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    /// The most recent velocity setpoint, if any
    pub fn last_command(&self) -> Option<Vector6> {
        self.last_command
    }

    fn ensure_connected(&self) -> Result<(), RobotError> {
        if self.connected {
            Ok(())
        } else {
            Err(RobotError::Disconnected)
        }
    }

    /// Advance the pose to `now`, zeroing velocity past the command expiry
    fn integrate(&mut self) {
        let now = Instant::now();

        let active_until = match self.command_deadline {
            Some(deadline) if deadline < now => deadline,
            _ => now,
        };

        if active_until > self.last_update {
            let dt = (active_until - self.last_update).as_secs_f64();
            for axis in 0..6 {
                self.pose[axis] += self.velocity[axis] * dt;
            }
        }

        if self
            .command_deadline
            .map_or(false, |deadline| deadline < now)
        {
            self.velocity = [0.0; 6];
            self.command_deadline = None;
        }

        self.last_update = now;
    }
}

impl Default for SimulatedMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionInterface for SimulatedMotion {
    fn target_pose(&mut self) -> Result<Vector6, RobotError> {
        self.ensure_connected()?;
        self.integrate();
        Ok(self.pose)
    }

    fn actual_pose(&mut self) -> Result<Vector6, RobotError> {
        self.ensure_connected()?;
        self.integrate();
        Ok(self.pose)
    }

    fn actual_velocity(&mut self) -> Result<Vector6, RobotError> {
        self.ensure_connected()?;
        self.integrate();
        Ok(self.velocity)
    }

    fn actual_joints(&mut self) -> Result<Vector6, RobotError> {
        self.ensure_connected()?;
        Ok(SIM_HOME_JOINTS)
    }

    fn actual_joint_velocity(&mut self) -> Result<Vector6, RobotError> {
        self.ensure_connected()?;
        Ok([0.0; 6])
    }

    fn send_velocity(
        &mut self,
        setpoint: Vector6,
        max_duration: Duration,
    ) -> Result<(), RobotError> {
        self.ensure_connected()?;
        self.integrate();

        self.velocity = setpoint;
        self.command_deadline = Some(Instant::now() + max_duration);
        self.commands_sent += 1;
        self.last_command = Some(setpoint);

        Ok(())
    }

    fn stop(&mut self) -> Result<(), RobotError> {
        self.ensure_connected()?;
        self.integrate();
        self.velocity = [0.0; 6];
        self.command_deadline = None;
        debug!("Simulated motion halted");
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            debug!("Simulated motion disconnected");
        }
    }
}
