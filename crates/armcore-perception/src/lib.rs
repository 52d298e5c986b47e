//! `armcore-perception` – camera-to-robot calibration.
//!
//! Turns pixel detections into poses in the robot base frame.
//!
//! # Modules
//!
//! - [`calibration`] – least-squares affine and DLT homography fitting,
//!   producing an immutable [`CalibrationTransform`][calibration::CalibrationTransform].
//! - [`engine`] – [`CalibrationEngine`][engine::CalibrationEngine]: holds the
//!   active transform and replaces it atomically on refit.
//! - [`record`] – JSON persistence of the active transform.

pub mod calibration;
pub mod engine;
pub mod record;

pub use calibration::{CalibrationModel, CalibrationTransform, Correspondence};
pub use engine::{CalibrationConfig, CalibrationEngine};
