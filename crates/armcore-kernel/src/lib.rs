//! `armcore-kernel` – safety and supervision.
//!
//! The kernel does not plan; it enforces.  Nothing reaches the arm without
//! passing through it.
//!
//! # Modules
//!
//! - [`workspace`] – [`WorkspaceValidator`][workspace::WorkspaceValidator]:
//!   ordered rule engine checking poses against axis ranges, the table
//!   plane and excluded cuboids; [`LiveBounds`][workspace::LiveBounds] makes
//!   the active bounds hot-reloadable (tightening only).
//! - [`safety_log`] – [`SafetyLog`][safety_log::SafetyLog]: append-only audit
//!   trail of state transitions with live subscription.
//! - [`supervisor`] – [`SafetySupervisor`][supervisor::SafetySupervisor]:
//!   owns the authoritative [`RobotState`][armcore_types::RobotState], admits
//!   one motion at a time, dispatches waypoints under bounded acknowledgement
//!   timeouts and runs the periodic hardware monitor.

pub mod safety_log;
pub mod supervisor;
pub mod workspace;

pub use safety_log::SafetyLog;
pub use supervisor::{
    CalibrationLease, MonitorHandle, MotionPermit, MotionReport, SafetySupervisor, SupervisorConfig,
};
pub use workspace::{AxisRange, ExclusionZone, LiveBounds, WorkspaceBounds, WorkspaceValidator};
