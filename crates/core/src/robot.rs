//! Robot Controller Boundary
//!
//! The physical control loop (motor position control, cameras, safety limits)
//! lives outside this crate. [`RobotController`] is the narrow surface the
//! execution gate drives. All calls are blocking and the implementations are
//! not expected to tolerate concurrent use; the gate guarantees they never
//! see any.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Failures reported by a controller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RobotError {
    /// The hardware link could not be established or was lost.
    #[error("Robot connection failed: {0}")]
    Connection(String),
    /// The control loop ran and reported failure.
    #[error("Control loop failed: {0}")]
    ControlLoop(String),
}

/// A handle on the robot's control loop.
pub trait RobotController: Send + 'static {
    fn connect(&mut self) -> Result<(), RobotError>;
    fn disconnect(&mut self) -> Result<(), RobotError>;
    fn is_connected(&self) -> bool;
    /// Drives the arm with the policy at `model_reference` for `duration`.
    /// Returns once the control loop has finished.
    fn run_control_loop(
        &mut self,
        model_reference: &str,
        duration: Duration,
    ) -> Result<(), RobotError>;
}

/// A dummy arm that never moves. Useful without hardware attached.
///
/// A run sleeps for `duration * time_scale`, so a scale of `0.0` makes every
/// execution return immediately.
#[derive(Debug)]
pub struct SimulatedArm {
    connected: bool,
    time_scale: f64,
}

impl SimulatedArm {
    pub fn new(time_scale: f64) -> Self {
        Self {
            connected: false,
            time_scale: time_scale.max(0.0),
        }
    }
}

impl Default for SimulatedArm {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RobotController for SimulatedArm {
    fn connect(&mut self) -> Result<(), RobotError> {
        self.connected = true;
        info!("Simulated arm connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RobotError> {
        self.connected = false;
        info!("Simulated arm disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn run_control_loop(
        &mut self,
        model_reference: &str,
        duration: Duration,
    ) -> Result<(), RobotError> {
        if !self.connected {
            return Err(RobotError::Connection("simulated arm is not connected".into()));
        }
        let simulated = duration.mul_f64(self.time_scale);
        debug!(model_reference, ?simulated, "Simulating control loop");
        std::thread::sleep(simulated);
        Ok(())
    }
}

/// Delegates each control loop to an external program.
///
/// The program is invoked as `<program> <args...> <model_reference> <seconds>`
/// and is expected to own the serial link for the duration of the run. A
/// non-zero exit status is a control-loop failure. `connect`/`disconnect`
/// only verify that the program exists, since the program opens and closes
/// the link itself on every run.
///
/// A run that outlives its control duration plus the grace period is killed
/// and reported as a control-loop failure.
#[derive(Debug)]
pub struct ProcessController {
    program: PathBuf,
    args: Vec<String>,
    connected: bool,
    grace: Duration,
}

const DEFAULT_GRACE: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

impl ProcessController {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            connected: false,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Parses a whitespace-separated command line, e.g.
    /// `python -m lerobot_runner --robot moss`.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl RobotController for ProcessController {
    fn connect(&mut self) -> Result<(), RobotError> {
        let resolvable = self.program.components().count() == 1 || self.program.exists();
        if !resolvable {
            return Err(RobotError::Connection(format!(
                "control program '{}' not found",
                self.program.display()
            )));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RobotError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn run_control_loop(
        &mut self,
        model_reference: &str,
        duration: Duration,
    ) -> Result<(), RobotError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(model_reference)
            .arg(format!("{}", duration.as_secs_f64()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                self.connected = false;
                RobotError::Connection(format!(
                    "failed to start '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;

        // No deadline when the budget does not fit in an Instant.
        let deadline = Instant::now().checked_add(duration.saturating_add(self.grace));
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RobotError::ControlLoop(format!(
                        "lost track of '{}': {}",
                        self.program.display(),
                        e
                    )));
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(pid = child.id(), ?duration, grace = ?self.grace, "Control program overran, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(RobotError::ControlLoop(format!(
                    "'{}' timed out after {:?}",
                    self.program.display(),
                    duration.saturating_add(self.grace)
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if status.success() {
            Ok(())
        } else {
            warn!(%status, "Control program failed");
            Err(RobotError::ControlLoop(format!(
                "'{}' exited with {}",
                self.program.display(),
                status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_arm_lifecycle() {
        let mut arm = SimulatedArm::new(0.0);
        assert!(!arm.is_connected());
        assert!(matches!(
            arm.run_control_loop("m", Duration::from_secs(30)),
            Err(RobotError::Connection(_))
        ));

        arm.connect().unwrap();
        assert!(arm.is_connected());
        arm.run_control_loop("m", Duration::from_secs(30)).unwrap();

        arm.disconnect().unwrap();
        assert!(!arm.is_connected());
    }

    #[test]
    fn test_simulated_arm_scales_duration() {
        let mut arm = SimulatedArm::new(0.01);
        arm.connect().unwrap();
        let started = std::time::Instant::now();
        arm.run_control_loop("m", Duration::from_secs(2)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_command_line_parsing() {
        let controller = ProcessController::from_command_line("python -m runner --robot moss").unwrap();
        assert_eq!(controller.program, PathBuf::from("python"));
        assert_eq!(controller.args, vec!["-m", "runner", "--robot", "moss"]);
        assert!(ProcessController::from_command_line("   ").is_none());
    }

    #[test]
    fn test_missing_program_fails_to_connect() {
        let mut controller = ProcessController::new("/no/such/control-program", vec![]);
        assert!(matches!(controller.connect(), Err(RobotError::Connection(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_exit_status_maps_to_outcome() {
        let mut ok = ProcessController::new("true", vec![]);
        ok.connect().unwrap();
        ok.run_control_loop("lab/grab_cup", Duration::from_secs(1)).unwrap();

        let mut failing = ProcessController::new("false", vec![]);
        failing.connect().unwrap();
        let err = failing
            .run_control_loop("lab/grab_cup", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RobotError::ControlLoop(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_overrunning_program_is_killed() {
        let mut hung = ProcessController::new("sh", vec!["-c".into(), "sleep 5".into()])
            .with_grace(Duration::from_millis(100));
        hung.connect().unwrap();

        let started = Instant::now();
        let err = hung
            .run_control_loop("lab/grab_cup", Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, RobotError::ControlLoop(ref message) if message.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(hung.is_connected());
    }
}
