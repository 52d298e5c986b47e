//! Error taxonomy.
//!
//! Calibration, validation and planning errors are local and returned to the
//! caller synchronously.  [`ArmError`] spans the whole crate family and adds
//! the admission, hardware and estop failures raised by the supervisor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pose::Axis;
use crate::state::RobotState;

/// Failures of the pixel↔robot calibration.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalibrationError {
    #[error("insufficient correspondences: {provided} provided, {required} required")]
    InsufficientPoints { required: usize, provided: usize },

    #[error("degenerate correspondence configuration: {reason}")]
    DegenerateConfiguration { reason: String },

    #[error("calibration residual {residual_mm:.3} mm exceeds tolerance {tolerance_mm:.3} mm")]
    AccuracyExceeded { residual_mm: f64, tolerance_mm: f64 },

    #[error("no calibration transform is loaded")]
    NotCalibrated,

    #[error("calibration record error: {0}")]
    Persistence(String),
}

/// Reasons a pose is rejected by the workspace validator.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("{axis} = {value:.3} mm is outside [{min:.3}, {max:.3}]")]
    OutOfBounds {
        axis: Axis,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("pose ({x:.3}, {y:.3}, {z:.3}) lies inside excluded zone '{zone_id}'")]
    ExcludedZone {
        zone_id: String,
        x: f64,
        y: f64,
        z: f64,
    },

    #[error("z = {z:.3} mm is below the table plane at {table_z:.3} mm")]
    BelowTablePlane { z: f64, table_z: f64 },

    #[error("{axis} is not a finite number")]
    NonFinite { axis: Axis },
}

impl ValidationError {
    /// The offending axis, when the rejection is tied to one.
    pub fn axis(&self) -> Option<Axis> {
        match self {
            ValidationError::OutOfBounds { axis, .. } | ValidationError::NonFinite { axis } => {
                Some(*axis)
            }
            ValidationError::BelowTablePlane { .. } => Some(Axis::Z),
            ValidationError::ExcludedZone { .. } => None,
        }
    }
}

/// Coarse category of a [`PlanningError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningCause {
    Calibration,
    Bounds,
    NoValidPath,
    InvalidStep,
}

/// Failures of the trajectory planner.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanningError {
    #[error("pixel target could not be resolved: {0}")]
    Calibration(#[source] CalibrationError),

    #[error("target rejected by workspace validator: {0}")]
    Bounds(#[source] ValidationError),

    #[error(
        "no valid path: waypoint {waypoint} of the lifted detour at z = {clearance_z:.1} mm failed: {violation}"
    )]
    NoValidPath {
        clearance_z: f64,
        waypoint: usize,
        violation: ValidationError,
    },

    #[error("max step {max_step_mm} is not a positive distance coarse enough to plan with")]
    InvalidStep { max_step_mm: f64 },
}

impl PlanningError {
    pub fn cause(&self) -> PlanningCause {
        match self {
            PlanningError::Calibration(_) => PlanningCause::Calibration,
            PlanningError::Bounds(_) => PlanningCause::Bounds,
            PlanningError::NoValidPath { .. } => PlanningCause::NoValidPath,
            PlanningError::InvalidStep { .. } => PlanningCause::InvalidStep,
        }
    }
}

/// Global error type spanning calibration, planning, supervision and
/// hardware failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArmError {
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Robot busy: a motion is already {state}")]
    Busy { state: RobotState },

    #[error("Calibration refused while robot is {state}")]
    CalibrationBusy { state: RobotState },

    #[error("Hardware timeout: {operation} not completed within {timeout_ms} ms")]
    HardwareTimeout { operation: String, timeout_ms: u64 },

    #[error("Emergency stop engaged: robot is {state}")]
    EstopEngaged { state: RobotState },

    #[error("Hardware Fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("Motion cancelled after {completed} of {total} waypoints")]
    Cancelled { completed: usize, total: usize },

    #[error("Detection '{label}' confidence {confidence} is below the required {min_confidence}")]
    LowConfidence {
        label: String,
        confidence: f32,
        min_confidence: f32,
    },

    #[error("Controller has not been initialized")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl ArmError {
    /// Convenience constructor for adapter-level failures.
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        ArmError::Hardware {
            component: component.into(),
            details: details.into(),
        }
    }
}
