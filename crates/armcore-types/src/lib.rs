//! `armcore-types` – shared vocabulary of the arm coordination core.
//!
//! Value types ([`Pose`], [`Waypoint`], [`Trajectory`]), the authoritative
//! [`RobotState`] enumeration, the [`SafetyEvent`] audit record and the error
//! taxonomy used by every other `armcore` crate.

pub mod error;
pub mod motion;
pub mod pose;
pub mod state;

pub use error::{ArmError, CalibrationError, PlanningCause, PlanningError, ValidationError};
pub use motion::{Trajectory, Waypoint};
pub use pose::{Axis, Detection, Orientation, PixelCoord, Pose};
pub use state::{HardwareStatus, RobotState, SafetyCause, SafetyEvent};
