//! `armcore-runtime` – planning and the controller facade.
//!
//! # Modules
//!
//! - [`planner`] – [`TrajectoryPlanner`][planner::TrajectoryPlanner]: turns a
//!   pose or pixel target into a bounded-step, workspace-checked trajectory,
//!   detouring over obstacles at a clearance height when the straight line is
//!   blocked.
//! - [`controller`] – [`RobotController`][controller::RobotController]: the
//!   public entry point; owns calibration, bounds and the safety supervisor
//!   for one arm.
//! - [`config`] – [`ControllerConfig`][config::ControllerConfig]: TOML file
//!   plus `ARMCORE_*` environment overrides.
//! - [`telemetry`] – tracing subscriber and optional OTLP span export.

pub mod config;
pub mod controller;
pub mod planner;
pub mod telemetry;

pub use armcore_kernel::MotionReport;
pub use config::{CalibrationSettings, ControllerConfig};
pub use controller::RobotController;
pub use planner::{PlannerConfig, Target, TrajectoryPlanner};
