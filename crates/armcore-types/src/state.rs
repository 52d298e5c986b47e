//! Robot state, hardware status and the safety audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pose::Axis;

/// Authoritative operating state of the arm.
///
/// Exactly one instance exists per robot, owned by the safety supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotState {
    Idle,
    Planning,
    Moving,
    Estop,
    Fault,
    /// Resting state when driving a simulated adapter.  Behaves like
    /// [`RobotState::Idle`] for admission purposes.
    Simulation,
}

impl RobotState {
    /// `true` for the states from which a new motion may start.
    pub fn is_at_rest(self) -> bool {
        matches!(self, RobotState::Idle | RobotState::Simulation)
    }

    /// `true` for the latched states that need an operator action to leave.
    pub fn is_latched(self) -> bool {
        matches!(self, RobotState::Estop | RobotState::Fault)
    }

    /// `true` while a motion request is being planned or executed.
    pub fn is_busy(self) -> bool {
        matches!(self, RobotState::Planning | RobotState::Moving)
    }
}

impl std::fmt::Display for RobotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RobotState::Idle => "IDLE",
            RobotState::Planning => "PLANNING",
            RobotState::Moving => "MOVING",
            RobotState::Estop => "ESTOP",
            RobotState::Fault => "FAULT",
            RobotState::Simulation => "SIMULATION",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by the hardware status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardwareStatus {
    pub ok: bool,
    pub estop_triggered: bool,
    pub fault_code: Option<u32>,
}

impl HardwareStatus {
    pub fn healthy() -> Self {
        Self {
            ok: true,
            estop_triggered: false,
            fault_code: None,
        }
    }

    /// `true` when the hardware reports a condition that must halt motion.
    pub fn demands_stop(&self) -> bool {
        self.estop_triggered || self.fault_code.is_some()
    }
}

/// Why a state transition happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyCause {
    /// Controller brought up and the hardware link established.
    Initialized,
    /// A motion was requested by the operator or agent layer.
    OperatorRequest,
    PlanReady { trajectory_id: Uuid, waypoints: usize },
    PlanningFailed { reason: String },
    MotionComplete { trajectory_id: Uuid },
    /// Operator-initiated abort honoured at a waypoint boundary.
    Cancelled { completed: usize, remaining: usize },
    /// A waypoint failed the live workspace check before it was sent.
    BoundsViolation {
        waypoint: usize,
        axis: Option<Axis>,
        detail: String,
    },
    HardwareTimeout { waypoint: usize, timeout_ms: u64 },
    HardwareError { detail: String },
    /// Status polling failed after all retries.
    StatusLinkLost { detail: String },
    /// Estop commanded through the software interface.
    ExplicitEstop,
    /// Estop raised by the hardware (button or fault code).
    ExternalEstop { fault_code: Option<u32> },
    OperatorClear,
    OperatorReset,
    CalibrationStarted,
    CalibrationFinished,
    Shutdown,
}

/// A timestamped, append-only audit record of one state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub from: RobotState,
    pub to: RobotState,
    pub cause: SafetyCause,
}

impl SafetyEvent {
    pub fn new(from: RobotState, to: RobotState, cause: SafetyCause) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            from,
            to,
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_and_latched_partition() {
        assert!(RobotState::Idle.is_at_rest());
        assert!(RobotState::Simulation.is_at_rest());
        assert!(!RobotState::Moving.is_at_rest());
        assert!(RobotState::Estop.is_latched());
        assert!(RobotState::Fault.is_latched());
        assert!(RobotState::Planning.is_busy());
        assert!(!RobotState::Idle.is_busy());
    }

    #[test]
    fn robot_state_serializes_screaming_case() {
        let json = serde_json::to_string(&RobotState::Estop).unwrap();
        assert_eq!(json, "\"ESTOP\"");
        assert_eq!(RobotState::Simulation.to_string(), "SIMULATION");
    }

    #[test]
    fn status_demands_stop_on_fault_code() {
        let mut s = HardwareStatus::healthy();
        assert!(!s.demands_stop());
        s.fault_code = Some(17);
        assert!(s.demands_stop());
    }

    #[test]
    fn safety_event_roundtrip() {
        let ev = SafetyEvent::new(
            RobotState::Moving,
            RobotState::Estop,
            SafetyCause::ExternalEstop { fault_code: Some(3) },
        );
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("external_estop"));
        let back: SafetyEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
