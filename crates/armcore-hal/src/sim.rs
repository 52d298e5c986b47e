//! In-process simulation drivers for CI and operator dry-runs.
//!
//! [`SimArm`] implements [`HardwareAdapter`] with synthetic but well-formed
//! acknowledgements and status.  It records every command it receives and
//! exposes hooks to inject the failures the supervisor must survive: a
//! pressed estop button, hardware fault codes, stalled motions and dropped
//! status polls.  [`SimMarkerCamera`] reports where the arm's marker appears
//! in a virtual camera.
//!
//! # Example
//!
//! ```rust
//! use armcore_hal::{HardwareAdapter, SimArm};
//! use armcore_types::Pose;
//!
//! # tokio_test_block_on(async {
//! let arm = SimArm::new("sim_arm");
//! arm.connect().await.unwrap();
//! arm.send_pose_command(&Pose::new(100.0, 0.0, 200.0)).await.unwrap();
//! assert_eq!(arm.get_current_pose().await.unwrap(), Pose::new(100.0, 0.0, 200.0));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use armcore_types::{ArmError, Detection, HardwareStatus, Pose};
use tracing::{debug, warn};

use crate::adapter::{DetectionSource, HardwareAdapter};

// ────────────────────────────────────────────────────────────────────────────
// SimArm
// ────────────────────────────────────────────────────────────────────────────

/// Tunables for a [`SimArm`].
#[derive(Debug, Clone, Copy)]
pub struct SimArmConfig {
    /// Simulated travel time for every pose command.
    pub step_delay: Duration,
    /// Pose reported before the first command.
    pub initial_pose: Pose,
}

impl Default for SimArmConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::ZERO,
            initial_pose: Pose::new(0.0, 0.0, 200.0),
        }
    }
}

#[derive(Debug)]
struct SimState {
    pose: Pose,
    connected: bool,
    /// Physical estop button held down.
    button_pressed: bool,
    /// Software latch set by `emergency_stop`.
    latched: bool,
    fault_code: Option<u32>,
    stall_from: Option<usize>,
    dropped_polls_remaining: usize,
    status_polls: usize,
    commands: Vec<Pose>,
    stops: usize,
    emergency_stops: usize,
}

/// A simulated arm that acknowledges every command after a fixed delay.
pub struct SimArm {
    id: String,
    config: SimArmConfig,
    state: Mutex<SimState>,
}

impl SimArm {
    /// Create a simulated arm with zero travel time.
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Self::with_config(id, SimArmConfig::default())
    }

    pub fn with_config(id: impl Into<String>, config: SimArmConfig) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            config,
            state: Mutex::new(SimState {
                pose: config.initial_pose,
                connected: false,
                button_pressed: false,
                latched: false,
                fault_code: None,
                stall_from: None,
                dropped_polls_remaining: 0,
                status_polls: 0,
                commands: Vec::new(),
                stops: 0,
                emergency_stops: 0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Failure injection ────────────────────────────────────────────────

    /// Simulate the physical estop button being pressed.
    pub fn press_estop_button(&self) {
        self.state().button_pressed = true;
    }

    pub fn release_estop_button(&self) {
        self.state().button_pressed = false;
    }

    /// Report (or clear) a hardware fault code in the status.
    pub fn set_fault_code(&self, code: Option<u32>) {
        self.state().fault_code = code;
    }

    /// Never acknowledge command number `n` (0-based) or any later one.
    pub fn stall_from_command(&self, n: usize) {
        self.state().stall_from = Some(n);
    }

    /// Fail the next `n` status polls.
    pub fn drop_status_polls(&self, n: usize) {
        self.state().dropped_polls_remaining = n;
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn current_pose(&self) -> Pose {
        self.state().pose
    }

    /// Every pose command received, in order.
    pub fn commands(&self) -> Vec<Pose> {
        self.state().commands.clone()
    }

    pub fn command_count(&self) -> usize {
        self.state().commands.len()
    }

    pub fn stop_count(&self) -> usize {
        self.state().stops
    }

    pub fn emergency_stop_count(&self) -> usize {
        self.state().emergency_stops
    }

    pub fn status_polls(&self) -> usize {
        self.state().status_polls
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_latched(&self) -> bool {
        self.state().latched
    }

    fn halted(state: &SimState) -> bool {
        state.latched || state.button_pressed
    }
}

#[async_trait]
impl HardwareAdapter for SimArm {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), ArmError> {
        self.state().connected = true;
        debug!(adapter = %self.id, "sim arm connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ArmError> {
        self.state().connected = false;
        debug!(adapter = %self.id, "sim arm disconnected");
        Ok(())
    }

    async fn send_pose_command(&self, pose: &Pose) -> Result<(), ArmError> {
        let stalled = {
            let mut s = self.state();
            if !s.connected {
                return Err(ArmError::hardware(&self.id, "not connected"));
            }
            if Self::halted(&s) {
                return Err(ArmError::hardware(&self.id, "estop latched; command refused"));
            }
            s.commands.push(*pose);
            let index = s.commands.len() - 1;
            s.stall_from.is_some_and(|n| index >= n)
        };

        if stalled {
            warn!(adapter = %self.id, "sim arm stalled; acknowledgement withheld");
            std::future::pending::<()>().await;
        }
        if !self.config.step_delay.is_zero() {
            tokio::time::sleep(self.config.step_delay).await;
        }

        let mut s = self.state();
        if Self::halted(&s) {
            return Err(ArmError::hardware(&self.id, "motion interrupted by estop"));
        }
        s.pose = *pose;
        Ok(())
    }

    async fn get_current_pose(&self) -> Result<Pose, ArmError> {
        let s = self.state();
        if !s.connected {
            return Err(ArmError::hardware(&self.id, "not connected"));
        }
        Ok(s.pose)
    }

    async fn get_status(&self) -> Result<HardwareStatus, ArmError> {
        let mut s = self.state();
        s.status_polls += 1;
        if s.dropped_polls_remaining > 0 {
            s.dropped_polls_remaining -= 1;
            return Err(ArmError::hardware(&self.id, "status frame dropped"));
        }
        Ok(HardwareStatus {
            ok: s.connected && s.fault_code.is_none(),
            estop_triggered: s.button_pressed,
            fault_code: s.fault_code,
        })
    }

    async fn stop(&self) -> Result<(), ArmError> {
        self.state().stops += 1;
        Ok(())
    }

    async fn emergency_stop(&self) -> Result<(), ArmError> {
        let mut s = self.state();
        s.latched = true;
        s.emergency_stops += 1;
        Ok(())
    }

    async fn clear_estop(&self) -> Result<(), ArmError> {
        let mut s = self.state();
        if s.button_pressed {
            return Err(ArmError::hardware(&self.id, "estop button still engaged"));
        }
        s.latched = false;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimMarkerCamera
// ────────────────────────────────────────────────────────────────────────────

/// A virtual camera that sees a single marker mounted on a [`SimArm`].
///
/// The marker's pixel location is the arm's current `(x, y)` pushed through a
/// fixed robot→pixel affine map `[[a, b, c], [d, e, f]]`:
/// `u = a·x + b·y + c`, `v = d·x + e·y + f`, rounded to whole pixels.
pub struct SimMarkerCamera {
    arm: Arc<SimArm>,
    label: String,
    robot_to_pixel: [[f64; 3]; 2],
    confidence: f32,
}

impl SimMarkerCamera {
    pub fn new(arm: Arc<SimArm>, label: impl Into<String>, robot_to_pixel: [[f64; 3]; 2]) -> Self {
        Self {
            arm,
            label: label.into(),
            robot_to_pixel,
            confidence: 0.95,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

#[async_trait]
impl DetectionSource for SimMarkerCamera {
    async fn detect(&self, label: &str) -> Result<Option<Detection>, ArmError> {
        if label != self.label {
            return Ok(None);
        }
        let pose = self.arm.current_pose();
        let m = &self.robot_to_pixel;
        let u = m[0][0] * pose.x + m[0][1] * pose.y + m[0][2];
        let v = m[1][0] * pose.x + m[1][1] * pose.y + m[1][2];
        Ok(Some(Detection {
            label: self.label.clone(),
            pixel_x: u.round() as i32,
            pixel_y: v.round() as i32,
            confidence: self.confidence,
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_require_connection() {
        let arm = SimArm::new("sim");
        let err = arm.send_pose_command(&Pose::new(1.0, 1.0, 100.0)).await;
        assert!(matches!(err, Err(ArmError::Hardware { .. })));
        arm.connect().await.unwrap();
        arm.send_pose_command(&Pose::new(1.0, 1.0, 100.0)).await.unwrap();
        assert_eq!(arm.current_pose(), Pose::new(1.0, 1.0, 100.0));
        assert_eq!(arm.command_count(), 1);
    }

    #[tokio::test]
    async fn emergency_stop_latches_until_cleared() {
        let arm = SimArm::new("sim");
        arm.connect().await.unwrap();
        arm.emergency_stop().await.unwrap();
        assert!(arm.is_latched());
        assert!(arm.send_pose_command(&Pose::new(0.0, 0.0, 100.0)).await.is_err());
        arm.clear_estop().await.unwrap();
        assert!(arm.send_pose_command(&Pose::new(0.0, 0.0, 100.0)).await.is_ok());
        assert_eq!(arm.emergency_stop_count(), 1);
    }

    #[tokio::test]
    async fn clear_refused_while_button_pressed() {
        let arm = SimArm::new("sim");
        arm.connect().await.unwrap();
        arm.press_estop_button();
        assert!(arm.get_status().await.unwrap().estop_triggered);
        assert!(arm.clear_estop().await.is_err());
        arm.release_estop_button();
        assert!(arm.clear_estop().await.is_ok());
        assert!(!arm.get_status().await.unwrap().estop_triggered);
    }

    #[tokio::test]
    async fn stalled_command_never_acknowledges() {
        let arm = SimArm::new("sim");
        arm.connect().await.unwrap();
        arm.stall_from_command(0);
        let res = tokio::time::timeout(
            Duration::from_millis(30),
            arm.send_pose_command(&Pose::new(5.0, 0.0, 100.0)),
        )
        .await;
        assert!(res.is_err(), "stalled command must not resolve");
        assert_eq!(arm.current_pose(), SimArmConfig::default().initial_pose);
    }

    #[tokio::test]
    async fn fault_code_reported_in_status() {
        let arm = SimArm::new("sim");
        arm.connect().await.unwrap();
        arm.set_fault_code(Some(42));
        let status = arm.get_status().await.unwrap();
        assert!(!status.ok);
        assert_eq!(status.fault_code, Some(42));
        assert!(status.demands_stop());
    }

    #[tokio::test]
    async fn marker_camera_projects_arm_pose() {
        let arm = SimArm::new("sim");
        arm.connect().await.unwrap();
        arm.send_pose_command(&Pose::new(100.0, -50.0, 120.0)).await.unwrap();
        let cam = SimMarkerCamera::new(arm.clone(), "marker", [[2.0, 0.0, 320.0], [0.0, -2.0, 240.0]]);
        let det = cam.detect("marker").await.unwrap().unwrap();
        assert_eq!((det.pixel_x, det.pixel_y), (520, 340));
        assert!(cam.detect("cup").await.unwrap().is_none());
    }
}
